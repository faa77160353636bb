//! Storage backends for the matchmaker's collaborators
//!
//! The run consumes a `SimilarityStore` (entities, kNN, partner metadata)
//! and a `PairingStore` (tabular pairing history). `SqliteStore` and
//! `MemoryStore` implement both.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, DEFAULT_BUSY_TIMEOUT};
pub use traits::{
    BulkUpsert, Cell, MetadataPatch, Neighbor, OpenStore, PairingStore, Row, SimilarityStore,
    StorageError, StorageResult, DEFAULT_FETCH_LIMIT,
};
