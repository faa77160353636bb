//! Run-level error taxonomy
//!
//! Every fatal failure reaches the trigger layer as one `MatchmakerError`.
//! Persistence failures carry the pairs involved so a retry can be planned.

use crate::config::ConfigError;
use crate::graph::{CanonicalPair, RetrievalError};
use crate::matching::ContractViolation;
use crate::storage::StorageError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stage of a run, used to report where cancellation took effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Retrieval,
    GraphConstruction,
    Matching,
    Persistence,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Retrieval => "retrieval",
            RunStage::GraphConstruction => "graph construction",
            RunStage::Matching => "matching",
            RunStage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum MatchmakerError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("matching contract violated: {0}")]
    AlgorithmContract(#[from] ContractViolation),

    /// Nothing was recorded; every pair in `pairs` is still unwritten
    #[error("failed to persist {} pair(s): {source}", .pairs.len())]
    Persistence {
        pairs: Vec<CanonicalPair>,
        #[source]
        source: StorageError,
    },

    /// The pairing table accepted `pairs` but partner metadata was not
    /// updated for `failed_ids`. Needs manual reconciliation.
    #[error(
        "partial persistence: {} pair(s) written to the pairing table, partner metadata not updated for [{}]: {source}",
        .pairs.len(),
        .failed_ids.join(", ")
    )]
    PartialPersistence {
        pairs: Vec<CanonicalPair>,
        updated_ids: Vec<String>,
        failed_ids: Vec<String>,
        #[source]
        source: StorageError,
    },

    #[error("run cancelled during {0}")]
    Cancelled(RunStage),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MatchmakerError {
    /// Stable machine-readable name of the failure class
    pub fn kind(&self) -> &'static str {
        match self {
            MatchmakerError::Retrieval(_) => "retrieval",
            MatchmakerError::AlgorithmContract(_) => "algorithm_contract",
            MatchmakerError::Persistence { .. } => "persistence",
            MatchmakerError::PartialPersistence { .. } => "partial_persistence",
            MatchmakerError::Cancelled(_) => "cancelled",
            MatchmakerError::Config(_) => "config",
        }
    }

    /// Pairs whose persistence did not fully complete
    pub fn affected_pairs(&self) -> &[CanonicalPair] {
        match self {
            MatchmakerError::Persistence { pairs, .. }
            | MatchmakerError::PartialPersistence { pairs, .. } => pairs,
            _ => &[],
        }
    }
}

/// Result type for run operations
pub type MatchmakerResult<T> = Result<T, MatchmakerError>;
