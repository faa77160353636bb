//! Collaborator contracts for the similarity store and the pairing table

use crate::graph::Entity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// Largest snapshot a single `fetch_all` may return unless configured otherwise
pub const DEFAULT_FETCH_LIMIT: usize = 10_000;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store holds {found} entities, more than the fetch limit of {limit}")]
    LimitExceeded { limit: usize, found: usize },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One nearest-neighbor hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub score: f32,
}

impl Neighbor {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Partial metadata update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPatch {
    #[serde(rename = "pastPairings", skip_serializing_if = "Option::is_none")]
    pub past_pairings: Option<Vec<String>>,
}

impl MetadataPatch {
    /// Replace the past-partner list
    pub fn past_pairings<I, S>(partners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            past_pairings: Some(partners.into_iter().map(Into::into).collect()),
        }
    }
}

/// One cell of a tabular row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub column: String,
    pub value: Value,
}

/// A tabular row as a list of cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cells.push(Cell {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Value of the first cell in `column`
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|cell| cell.column == column)
            .map(|cell| &cell.value)
    }
}

/// A bulk upsert request keyed by `key_columns`.
///
/// Serializes in the tabular service's wire shape:
/// `{"rows": [{"cells": [...]}], "keyColumns": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpsert {
    pub rows: Vec<Row>,
    pub key_columns: Vec<String>,
}

impl BulkUpsert {
    pub fn new(key_columns: Vec<String>) -> Self {
        Self {
            rows: Vec::new(),
            key_columns,
        }
    }

    pub fn with_row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    /// Upsert key of every row, in row order.
    ///
    /// Each key is the JSON array of the row's key-column values in sorted
    /// order, so the key is unordered: `(a, b)` and `(b, a)` name the same
    /// record. A request without key columns, or a row missing one, is
    /// rejected.
    pub fn row_keys(&self) -> StorageResult<Vec<String>> {
        if self.key_columns.is_empty() {
            return Err(StorageError::InvalidRow(
                "bulk upsert requires at least one key column".to_string(),
            ));
        }
        self.rows
            .iter()
            .enumerate()
            .map(|(position, row)| {
                let mut values = self
                    .key_columns
                    .iter()
                    .map(|column| {
                        let value = row.value(column).ok_or_else(|| {
                            StorageError::InvalidRow(format!(
                                "row {} has no value for key column '{}'",
                                position, column
                            ))
                        })?;
                        Ok(serde_json::to_string(value)?)
                    })
                    .collect::<StorageResult<Vec<String>>>()?;
                values.sort();
                Ok(format!("[{}]", values.join(",")))
            })
            .collect()
    }
}

/// The similarity-vector store, consumed synchronously.
///
/// Implementations must be thread-safe (Send + Sync): nearest-neighbor
/// queries for one run may be issued from several worker threads. Remote
/// adapters must bound every call with a timeout and resolve any
/// asynchronous client futures before returning.
pub trait SimilarityStore: Send + Sync {
    /// Every stored entity.
    ///
    /// When the store holds more than it can return in one snapshot it must
    /// fail with `LimitExceeded` rather than truncate.
    fn fetch_all(&self) -> StorageResult<Vec<Entity>>;

    /// Up to `k` hits ordered by descending score. The querying entity's own
    /// vector is normally among them.
    fn query_nearest(&self, vector: &[f32], k: usize) -> StorageResult<Vec<Neighbor>>;

    /// Merge `patch` into the metadata of entity `id`
    fn upsert_metadata(&self, id: &str, patch: &MetadataPatch) -> StorageResult<()>;
}

/// The tabular pairing store.
///
/// `bulk_upsert` must be idempotent under the request's key columns:
/// re-submitting a row with the same key updates it in place. Any
/// non-success outcome is an error, never a partial count.
pub trait PairingStore: Send + Sync {
    /// Upsert rows into `table`; returns the number of rows accepted
    fn bulk_upsert(&self, table: &str, request: &BulkUpsert) -> StorageResult<usize>;

    /// All rows of `table` in key order
    fn rows(&self, table: &str) -> StorageResult<Vec<Row>>;

    fn row_count(&self, table: &str) -> StorageResult<usize> {
        Ok(self.rows(table)?.len())
    }
}

/// Extension trait for opening stores from paths
pub trait OpenStore: Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
