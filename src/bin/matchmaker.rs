//! Matchmaker CLI: run matchmaking against a local SQLite store.
//!
//! Usage:
//!   matchmaker run [--db path] [--config path] [--dry-run]
//!   matchmaker seed <file> [--db path]
//!   matchmaker pairs [--db path] [--config path]
//!
//! Reports go to stdout as JSON; logs go to stderr (`RUST_LOG`, default `info`).

use clap::{Parser, Subcommand};
use matchmaker::{
    CancellationToken, Entity, Matchmaker, MatchmakerConfig, MatchmakerError, OpenStore,
    PairingStore, SqliteStore,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Config file path when `--config` is not given
const CONFIG_ENV: &str = "MATCHMAKER_CONFIG";
/// Database path when `--db` is not given
const DB_ENV: &str = "MATCHMAKER_DB";

#[derive(Parser)]
#[command(
    name = "matchmaker",
    version,
    about = "Similarity-driven one-to-one matchmaking"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match every stored entity and record the new pairs
    Run {
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
        /// Path to YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Compute and print the pairs without writing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Load entities from a JSON array of {id, embedding, pastPairings}
    Seed {
        /// JSON file to load
        file: PathBuf,
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List recorded pairing rows
    Pairs {
        /// Path to SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
        /// Path to YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Get the default database path (~/.local/share/matchmaker/matchmaker.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("matchmaker").join("matchmaker.db")
}

fn load_config(path: Option<PathBuf>) -> Result<MatchmakerConfig, MatchmakerError> {
    match path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from)) {
        Some(path) => Ok(MatchmakerConfig::from_yaml_file(path)?),
        None => Ok(MatchmakerConfig::default()),
    }
}

/// `--db`, then the environment, then the config file, then the data directory
fn resolve_db_path(db: Option<PathBuf>, config: &MatchmakerConfig) -> PathBuf {
    db.or_else(|| std::env::var_os(DB_ENV).map(PathBuf::from))
        .or_else(|| config.storage.path.clone())
        .unwrap_or_else(default_db_path)
}

fn open_store(path: &Path, config: &MatchmakerConfig) -> Result<SqliteStore, String> {
    SqliteStore::open(path)
        .and_then(|store| {
            store.with_limits(config.retrieval.timeout(), config.retrieval.max_entities)
        })
        .map_err(|e| format!("Failed to open database: {}", e))
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to serialize output: {}", e),
    }
}

fn fail(kind: &str, message: impl std::fmt::Display) -> i32 {
    print_json(&json!({
        "status": "error",
        "kind": kind,
        "message": message.to_string(),
    }));
    1
}

fn fail_run(err: &MatchmakerError) -> i32 {
    tracing::error!(kind = err.kind(), error = %err, "matchmaking run failed");
    let pairs = err.affected_pairs();
    if pairs.is_empty() {
        return fail(err.kind(), err);
    }
    print_json(&json!({
        "status": "error",
        "kind": err.kind(),
        "message": err.to_string(),
        "pairs": pairs,
    }));
    1
}

fn cmd_run(db: Option<PathBuf>, config: Option<PathBuf>, dry_run: bool) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(e) => return fail(e.kind(), e),
    };
    let store = match open_store(&resolve_db_path(db, &config), &config) {
        Ok(s) => s,
        Err(e) => return fail("storage", e),
    };

    let matchmaker = Matchmaker::new(&store, &store, config);
    let cancel = CancellationToken::new();
    if dry_run {
        match matchmaker.plan(&cancel) {
            Ok(plan) => print_json(&plan),
            Err(e) => return fail_run(&e),
        }
    } else {
        match matchmaker.perform_run(&cancel) {
            Ok(report) => print_json(&report),
            Err(e) => return fail_run(&e),
        }
    }
    0
}

fn cmd_seed(file: &Path, db: Option<PathBuf>) -> i32 {
    let config = match load_config(None) {
        Ok(c) => c,
        Err(e) => return fail(e.kind(), e),
    };
    let content = match std::fs::read_to_string(file) {
        Ok(c) => c,
        Err(e) => return fail("seed", format!("cannot read '{}': {}", file.display(), e)),
    };
    let entities: Vec<Entity> = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => return fail("seed", format!("invalid entity file: {}", e)),
    };
    let store = match open_store(&resolve_db_path(db, &config), &config) {
        Ok(s) => s,
        Err(e) => return fail("storage", e),
    };

    for entity in &entities {
        if let Err(e) = store.upsert_entity(entity) {
            return fail("storage", format!("failed to store '{}': {}", entity.id, e));
        }
    }
    print_json(&json!({ "status": "ok", "seeded": entities.len() }));
    0
}

fn cmd_pairs(db: Option<PathBuf>, config: Option<PathBuf>) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(e) => return fail(e.kind(), e),
    };
    let store = match open_store(&resolve_db_path(db, &config), &config) {
        Ok(s) => s,
        Err(e) => return fail("storage", e),
    };
    match store.rows(&config.pairing.table) {
        Ok(rows) => {
            let pairs: Vec<_> = rows
                .iter()
                .map(|row| {
                    json!([
                        row.value(&config.pairing.person_1_column),
                        row.value(&config.pairing.person_2_column),
                    ])
                })
                .collect();
            print_json(&json!({ "table": config.pairing.table, "pairs": pairs }));
            0
        }
        Err(e) => fail("storage", e),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run {
            db,
            config,
            dry_run,
        } => cmd_run(db, config, dry_run),
        Commands::Seed { file, db } => cmd_seed(&file, db),
        Commands::Pairs { db, config } => cmd_pairs(db, config),
    };
    std::process::exit(code);
}
