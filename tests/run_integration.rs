//! End-to-end runs against memory, failure-injecting and SQLite stores

mod common;

use common::{planets, FlakyStore};
use matchmaker::{
    BulkUpsert, CancellationToken, CanonicalPair, DiscoveryMode, Entity, Matchmaker, MatchmakerConfig,
    MatchmakerError, MemoryStore, OpenStore, PairingConfig, PairingStore, Reconciler,
    RetrievalError, Row, RunStage, SimilarityStore, SqliteStore, StorageError,
};
use std::collections::HashSet;
use tempfile::tempdir;

fn mercury_venus() -> CanonicalPair {
    CanonicalPair::new("venus", "mercury")
}

fn covered(pairs: &[CanonicalPair]) -> HashSet<&str> {
    pairs.iter().flat_map(|p| [p.lower(), p.upper()]).collect()
}

#[test]
fn forbidden_pair_never_reappears() {
    let store = MemoryStore::new().with_entities(planets()).unwrap();
    let matchmaker = Matchmaker::new(&store, &store, MatchmakerConfig::default());
    let report = matchmaker.perform_run(&CancellationToken::new()).unwrap();

    // The most similar pair is history, yet everyone is still matched
    assert!(!report.new_pairs.contains(&mercury_venus()));
    assert_eq!(report.new_pairs.len(), 5);
    assert_eq!(covered(&report.new_pairs).len(), 10);
    assert_eq!(report.counts.forbidden_pairs, 1);
}

#[test]
fn repeated_runs_never_repeat_a_pair() {
    let store = MemoryStore::new().with_entities(planets()).unwrap();
    let mut history: HashSet<CanonicalPair> = HashSet::from([mercury_venus()]);

    for mode in [DiscoveryMode::LowerIndex, DiscoveryMode::Symmetric, DiscoveryMode::LowerIndex] {
        let mut config = MatchmakerConfig::default();
        config.graph.discovery = mode;
        let report = Matchmaker::new(&store, &store, config)
            .perform_run(&CancellationToken::new())
            .unwrap();
        for pair in report.new_pairs {
            assert!(history.insert(pair.clone()), "{pair} proposed twice");
        }
    }
    assert_eq!(store.row_count("pairings").unwrap(), history.len() - 1);
}

#[test]
fn round_trip_persistence_is_idempotent() {
    let store = MemoryStore::new().with_entities(planets()).unwrap();
    let config = PairingConfig::default();
    let reconciler = Reconciler::new(&store, &store, &config);
    let snapshot = store.fetch_all().unwrap();
    let pairs = vec![CanonicalPair::new("mars", "earth"), CanonicalPair::new("eris", "pluto")];

    reconciler.persist(&pairs, &snapshot).unwrap();
    let rows = store.rows("pairings").unwrap();
    let earth = store.entity("earth").unwrap();

    reconciler.persist(&pairs, &snapshot).unwrap();
    assert_eq!(store.rows("pairings").unwrap(), rows);
    assert_eq!(store.entity("earth").unwrap(), earth);
}

#[test]
fn reversed_pair_does_not_add_a_row() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("pairs.db")).unwrap();
    let config = PairingConfig::default();
    let reconciler = Reconciler::new(&store, &store, &config);

    let forward = reconciler.build_request(&[CanonicalPair::new("earth", "mars")]);
    let reversed = reconciler.build_request(&[CanonicalPair::new("mars", "earth")]);
    assert_eq!(forward, reversed);

    store.bulk_upsert(&config.table, &forward).unwrap();
    store.bulk_upsert(&config.table, &reversed).unwrap();
    assert_eq!(store.row_count(&config.table).unwrap(), 1);

    // A caller that skips canonicalization still lands on the same record
    let raw = BulkUpsert::new(forward.key_columns.clone()).with_row(
        Row::new()
            .with_cell(config.person_1_column.as_str(), "mars")
            .with_cell(config.person_2_column.as_str(), "earth"),
    );
    store.bulk_upsert(&config.table, &raw).unwrap();
    assert_eq!(store.row_count(&config.table).unwrap(), 1);
}

#[test]
fn rejected_bulk_upsert_reports_the_pairs() {
    let mut store = FlakyStore::new(planets());
    store.fail_upsert = true;
    let matchmaker = Matchmaker::new(&store, &store, MatchmakerConfig::default());

    let plan = matchmaker.plan(&CancellationToken::new()).unwrap();
    let err = matchmaker.perform_run(&CancellationToken::new()).unwrap_err();
    match &err {
        MatchmakerError::Persistence { pairs, source } => {
            assert_eq!(pairs, &plan.new_pairs);
            assert!(matches!(source, StorageError::Rejected(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), "persistence");
    // Metadata is never touched when the table write fails
    assert_eq!(store.metadata_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn short_acceptance_is_a_hard_failure() {
    let mut store = FlakyStore::new(planets());
    store.short_accept = true;
    let err = Matchmaker::new(&store, &store, MatchmakerConfig::default())
        .perform_run(&CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        MatchmakerError::Persistence {
            source: StorageError::Rejected(_),
            ..
        }
    ));
}

#[test]
fn failed_metadata_update_is_partial_persistence() {
    let mut store = FlakyStore::new(planets());
    store.fail_metadata_for.insert("earth".to_string());
    let err = Matchmaker::new(&store, &store, MatchmakerConfig::default())
        .perform_run(&CancellationToken::new())
        .unwrap_err();

    match &err {
        MatchmakerError::PartialPersistence {
            pairs,
            updated_ids,
            failed_ids,
            ..
        } => {
            assert_eq!(pairs.len(), 5);
            assert_eq!(failed_ids, &vec!["earth".to_string()]);
            assert_eq!(updated_ids.len(), 9);
            assert!(!updated_ids.contains(&"earth".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), "partial_persistence");
    // The pairing table side did complete
    assert_eq!(store.row_count("pairings").unwrap(), 5);
}

#[test]
fn cancellation_mid_run_writes_nothing() {
    let token = CancellationToken::new();
    let mut store = FlakyStore::new(planets());
    store.cancel_on_query = Some(token.clone());

    let err = Matchmaker::new(&store, &store, MatchmakerConfig::default())
        .perform_run(&token)
        .unwrap_err();
    assert!(matches!(err, MatchmakerError::Cancelled(_)));
    assert_eq!(store.writes(), 0);
    assert_eq!(store.row_count("pairings").unwrap(), 0);
}

#[test]
fn failed_query_aborts_before_any_write() {
    let mut store = FlakyStore::new(planets());
    store.fail_query_for = Some("saturn".to_string());

    let err = Matchmaker::new(&store, &store, MatchmakerConfig::default())
        .perform_run(&CancellationToken::new())
        .unwrap_err();
    match err {
        MatchmakerError::Retrieval(RetrievalError::Query { entity_id, .. }) => {
            assert_eq!(entity_id, "saturn")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.writes(), 0);
}

#[test]
fn cancelled_error_names_the_stage() {
    let store = MemoryStore::new().with_entities(planets()).unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let err = Matchmaker::new(&store, &store, MatchmakerConfig::default())
        .plan(&token)
        .unwrap_err();
    assert!(matches!(err, MatchmakerError::Cancelled(RunStage::Retrieval)));
}

#[test]
fn sqlite_runs_accumulate_history() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("matchmaker.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        for entity in planets() {
            store.upsert_entity(&entity).unwrap();
        }
    }

    let first = {
        let store = SqliteStore::open(&path).unwrap();
        Matchmaker::new(&store, &store, MatchmakerConfig::default())
            .perform_run(&CancellationToken::new())
            .unwrap()
    };
    assert_eq!(first.counts.rows_written, first.new_pairs.len());
    assert!(!first.new_pairs.contains(&mercury_venus()));

    // History written by the first run is read back as forbidden pairs
    let store = SqliteStore::open(&path).unwrap();
    let reloaded: Vec<Entity> = store.fetch_all().unwrap();
    let forbidden = matchmaker::ForbiddenSet::from_entities(&reloaded);
    for pair in &first.new_pairs {
        assert!(forbidden.contains_pair(pair));
    }

    let second = Matchmaker::new(&store, &store, MatchmakerConfig::default())
        .perform_run(&CancellationToken::new())
        .unwrap();
    assert_eq!(second.counts.forbidden_pairs, 1 + first.new_pairs.len());
    for pair in &second.new_pairs {
        assert!(!first.new_pairs.contains(pair));
    }
    assert_eq!(
        store.row_count("pairings").unwrap(),
        first.new_pairs.len() + second.new_pairs.len()
    );
}
