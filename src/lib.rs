//! Matchmaker: similarity-driven one-to-one pairing with permanent history
//!
//! Pairs entities for periodic one-to-one matches by embedding similarity,
//! never proposing a pair that has matched before.
//!
//! # Core Concepts
//!
//! - **GraphBuilder**: nearest-neighbor queries turn an entity snapshot into a
//!   weighted candidate graph, minus self and forbidden pairs
//! - **MatchingEngine**: general-graph blossom matching that maximizes the
//!   number of pairs first and total similarity second
//! - **Reconciler**: canonicalizes the matched pairs and records them in the
//!   pairing table and in every participant's history
//!
//! # Example
//!
//! ```
//! use matchmaker::{CancellationToken, Entity, Matchmaker, MatchmakerConfig, MemoryStore};
//!
//! let store = MemoryStore::new()
//!     .with_entities([
//!         Entity::new("ada", vec![1.0, 0.0]),
//!         Entity::new("bo", vec![0.9, 0.1]),
//!     ])
//!     .unwrap();
//! let matchmaker = Matchmaker::new(&store, &store, MatchmakerConfig::default());
//! let report = matchmaker.perform_run(&CancellationToken::new()).unwrap();
//! assert_eq!(report.new_pairs.len(), 1);
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod graph;
pub mod matching;
pub mod reconcile;
pub mod run;
pub mod storage;

pub use cancel::CancellationToken;
pub use config::{
    ConfigError, DiscoveryMode, GraphConfig, MatchmakerConfig, PairingConfig, RetrievalConfig,
    StorageConfig,
};
pub use error::{MatchmakerError, MatchmakerResult, RunStage};
pub use graph::{
    CandidateGraph, CanonicalPair, Edge, Entity, ForbiddenSet, GraphBuilder, NodeIndex,
    RetrievalError, NO_PARTNER,
};
pub use matching::ContractViolation;
pub use reconcile::{PersistOutcome, Reconciler, Reconciliation};
pub use run::{Matchmaker, RunCounts, RunPlan, RunReport};
pub use storage::{
    BulkUpsert, MemoryStore, MetadataPatch, Neighbor, OpenStore, PairingStore, Row,
    SimilarityStore, SqliteStore, StorageError, StorageResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
