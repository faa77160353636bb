//! Shared fixtures for the run integration tests
//!
//! `FlakyStore` wraps a `MemoryStore` and injects collaborator failures at
//! chosen points, so each failure path of a run can be observed.

#![allow(dead_code)]

use matchmaker::{
    BulkUpsert, CancellationToken, Entity, MemoryStore, MetadataPatch, Neighbor, PairingStore,
    Row, SimilarityStore, StorageError, StorageResult, NO_PARTNER,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ten planets with interest embeddings; mercury and venus have already met
pub fn planets() -> Vec<Entity> {
    let raw: [(&str, [f32; 3]); 10] = [
        ("mercury", [1.0, 0.1, 0.0]),
        ("venus", [0.98, 0.12, 0.0]),
        ("earth", [0.1, 1.0, 0.0]),
        ("mars", [0.12, 0.97, 0.05]),
        ("jupiter", [0.0, 0.1, 1.0]),
        ("saturn", [0.05, 0.12, 0.98]),
        ("uranus", [0.7, 0.7, 0.1]),
        ("neptune", [0.68, 0.72, 0.12]),
        ("pluto", [0.5, 0.1, 0.8]),
        ("eris", [0.52, 0.08, 0.82]),
    ];
    raw.iter()
        .map(|(id, v)| {
            let entity = Entity::new(*id, v.to_vec());
            match *id {
                "mercury" => entity.with_partner("venus"),
                "venus" => entity.with_partner("mercury"),
                _ => entity.with_partner(NO_PARTNER),
            }
        })
        .collect()
}

/// Memory-backed store with failure injection
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Reject the bulk upsert outright
    pub fail_upsert: bool,
    /// Report one row fewer than submitted
    pub short_accept: bool,
    /// Entities whose metadata update fails
    pub fail_metadata_for: HashSet<String>,
    /// Fail the nearest-neighbor query for this entity's embedding
    pub fail_query_for: Option<String>,
    /// Cancelled on the first nearest-neighbor query
    pub cancel_on_query: Option<CancellationToken>,
    pub upsert_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            inner: MemoryStore::new().with_entities(entities).unwrap(),
            fail_upsert: false,
            short_accept: false,
            fail_metadata_for: HashSet::new(),
            fail_query_for: None,
            cancel_on_query: None,
            upsert_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst) + self.metadata_calls.load(Ordering::SeqCst)
    }
}

impl SimilarityStore for FlakyStore {
    fn fetch_all(&self) -> StorageResult<Vec<Entity>> {
        self.inner.fetch_all()
    }

    fn query_nearest(&self, vector: &[f32], k: usize) -> StorageResult<Vec<Neighbor>> {
        if let Some(token) = &self.cancel_on_query {
            token.cancel();
        }
        if let Some(id) = &self.fail_query_for {
            let target = self.inner.entity(id)?;
            if target.is_some_and(|e| e.embedding == vector) {
                return Err(StorageError::Unavailable("similarity service timed out".into()));
            }
        }
        self.inner.query_nearest(vector, k)
    }

    fn upsert_metadata(&self, id: &str, patch: &MetadataPatch) -> StorageResult<()> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata_for.contains(id) {
            return Err(StorageError::Rejected(format!("metadata update for {id} refused")));
        }
        self.inner.upsert_metadata(id, patch)
    }
}

impl PairingStore for FlakyStore {
    fn bulk_upsert(&self, table: &str, request: &BulkUpsert) -> StorageResult<usize> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert {
            return Err(StorageError::Rejected("status 503".into()));
        }
        let accepted = self.inner.bulk_upsert(table, request)?;
        if self.short_accept {
            return Ok(accepted.saturating_sub(1));
        }
        Ok(accepted)
    }

    fn rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        self.inner.rows(table)
    }
}
