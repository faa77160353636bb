//! In-memory backend for both collaborator traits
//!
//! Thread-safe via RwLock. Used by tests and by callers that want a run
//! without persistence.

use super::traits::{
    BulkUpsert, MetadataPatch, Neighbor, PairingStore, Row, SimilarityStore, StorageError,
    StorageResult, DEFAULT_FETCH_LIMIT,
};
use crate::graph::Entity;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Unavailable("lock poisoned".to_string())
}

/// Cosine similarity between two vectors
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Exhaustive kNN: rank every candidate by cosine similarity.
///
/// Ties are broken by identifier so results are reproducible.
pub(crate) fn rank_nearest<'a, I>(candidates: I, query: &[f32], k: usize) -> StorageResult<Vec<Neighbor>>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut hits = Vec::new();
    for (id, vector) in candidates {
        if vector.len() != query.len() {
            return Err(StorageError::Rejected(format!(
                "query has {} dimensions but '{}' has {}",
                query.len(),
                id,
                vector.len()
            )));
        }
        hits.push(Neighbor::new(id, cosine_similarity(query, vector)));
    }
    hits.sort_by(|x, y| y.score.total_cmp(&x.score).then_with(|| x.id.cmp(&y.id)));
    hits.truncate(k);
    Ok(hits)
}

/// In-memory similarity and pairing store
pub struct MemoryStore {
    entities: RwLock<BTreeMap<String, Entity>>,
    /// Outer key: table, inner key: row key
    tables: RwLock<HashMap<String, BTreeMap<String, Row>>>,
    fetch_limit: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            tables: RwLock::new(HashMap::new()),
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }

    /// Override the largest snapshot `fetch_all` will return
    pub fn with_fetch_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = limit;
        self
    }

    /// Seed with a batch of entities
    pub fn with_entities(self, entities: impl IntoIterator<Item = Entity>) -> StorageResult<Self> {
        for entity in entities {
            self.upsert_entity(entity)?;
        }
        Ok(self)
    }

    /// Insert or replace an entity
    pub fn upsert_entity(&self, entity: Entity) -> StorageResult<()> {
        self.entities
            .write()
            .map_err(poisoned)?
            .insert(entity.id.clone(), entity);
        Ok(())
    }

    pub fn entity(&self, id: &str) -> StorageResult<Option<Entity>> {
        Ok(self.entities.read().map_err(poisoned)?.get(id).cloned())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityStore for MemoryStore {
    fn fetch_all(&self) -> StorageResult<Vec<Entity>> {
        let entities = self.entities.read().map_err(poisoned)?;
        if entities.len() > self.fetch_limit {
            return Err(StorageError::LimitExceeded {
                limit: self.fetch_limit,
                found: entities.len(),
            });
        }
        Ok(entities.values().cloned().collect())
    }

    fn query_nearest(&self, vector: &[f32], k: usize) -> StorageResult<Vec<Neighbor>> {
        let entities = self.entities.read().map_err(poisoned)?;
        rank_nearest(
            entities
                .values()
                .map(|e| (e.id.as_str(), e.embedding.as_slice())),
            vector,
            k,
        )
    }

    fn upsert_metadata(&self, id: &str, patch: &MetadataPatch) -> StorageResult<()> {
        let mut entities = self.entities.write().map_err(poisoned)?;
        let entity = entities
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if let Some(partners) = &patch.past_pairings {
            entity.partners = partners.iter().cloned().collect();
        }
        Ok(())
    }
}

impl PairingStore for MemoryStore {
    fn bulk_upsert(&self, table: &str, request: &BulkUpsert) -> StorageResult<usize> {
        let keys = request.row_keys()?;
        let mut tables = self.tables.write().map_err(poisoned)?;
        let rows = tables.entry(table.to_string()).or_default();
        for (key, row) in keys.into_iter().zip(request.rows.iter()) {
            rows.insert(key, row.clone());
        }
        Ok(request.rows.len())
    }

    fn rows(&self, table: &str) -> StorageResult<Vec<Row>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}
