//! YAML configuration for matchmaking runs
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working configuration.
//!
//! ```yaml
//! graph:
//!   top_k: 50              # omit for min(50, N-1)
//!   discovery: lower_index # or: symmetric
//!   query_workers: 4
//! retrieval:
//!   max_entities: 10000
//!   timeout_ms: 30000
//! pairing:
//!   table: pairings
//!   person_1_column: person_1_id
//!   person_2_column: person_2_id
//!   send_email_column: send_email
//! storage:
//!   path: /var/lib/matchmaker/matchmaker.db
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Which nearest-neighbor discoveries become candidate edges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Keep a hit only when the querying node has the lower index
    #[default]
    LowerIndex,
    /// Keep hits from either side's query; a pair seen twice keeps its higher score
    Symmetric,
}

/// Candidate graph construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Neighbors requested per entity, not counting the entity itself.
    /// `None` means `min(50, N-1)`.
    pub top_k: Option<usize>,
    pub discovery: DiscoveryMode,
    /// Upper bound on concurrent nearest-neighbor queries
    pub query_workers: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            top_k: None,
            discovery: DiscoveryMode::default(),
            query_workers: 4,
        }
    }
}

/// Snapshot retrieval from the similarity store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Largest snapshot a run accepts; more is an error, never a truncation
    pub max_entities: usize,
    /// Timeout for every collaborator call, in milliseconds
    pub timeout_ms: u64,
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_entities: crate::storage::DEFAULT_FETCH_LIMIT,
            timeout_ms: 30_000,
        }
    }
}

/// Layout of the tabular pairing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub table: String,
    /// Column holding the lexicographically lower identifier
    pub person_1_column: String,
    /// Column holding the upper identifier
    pub person_2_column: String,
    /// When set, every written row carries `true` in this column
    pub send_email_column: Option<String>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            table: "pairings".to_string(),
            person_1_column: "person_1_id".to_string(),
            person_2_column: "person_2_id".to_string(),
            send_email_column: Some("send_email".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; the binary falls back to the user data directory
    pub path: Option<PathBuf>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerConfig {
    pub graph: GraphConfig,
    pub retrieval: RetrievalConfig,
    pub pairing: PairingConfig,
    pub storage: StorageConfig,
}

impl MatchmakerConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document parses as unit rather than a mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: MatchmakerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.graph.top_k == Some(0) {
            return Err(ConfigError::Validation("graph.top_k must be at least 1".into()));
        }
        if self.graph.query_workers == 0 {
            return Err(ConfigError::Validation(
                "graph.query_workers must be at least 1".into(),
            ));
        }
        if self.retrieval.max_entities == 0 {
            return Err(ConfigError::Validation(
                "retrieval.max_entities must be at least 1".into(),
            ));
        }
        if self.retrieval.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "retrieval.timeout_ms must be positive".into(),
            ));
        }

        let pairing = &self.pairing;
        if pairing.table.trim().is_empty() {
            return Err(ConfigError::Validation("pairing.table must not be empty".into()));
        }
        if pairing.person_1_column.trim().is_empty() || pairing.person_2_column.trim().is_empty() {
            return Err(ConfigError::Validation(
                "pairing person columns must not be empty".into(),
            ));
        }
        if pairing.person_1_column == pairing.person_2_column {
            return Err(ConfigError::Validation(
                "pairing person columns must differ".into(),
            ));
        }
        if let Some(send) = &pairing.send_email_column {
            if send == &pairing.person_1_column || send == &pairing.person_2_column {
                return Err(ConfigError::Validation(
                    "pairing.send_email_column must not reuse a person column".into(),
                ));
            }
        }
        Ok(())
    }
}
