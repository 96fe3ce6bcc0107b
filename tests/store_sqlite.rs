// tests/store_sqlite.rs
mod common;

use std::sync::Arc;

use common::{all_sources_transport, fast_config, FixtureTransport};
use macro_aggregator::store::MemoryStore;
use macro_aggregator::{Aggregator, Origin, SnapshotStore, SqliteStore, StoreError};

#[tokio::test]
async fn cycles_replace_latest_and_grow_history() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data").join("indicators.db");
    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let cfg = fast_config();

    let live = Aggregator::with_transport(&cfg, Arc::new(all_sources_transport()), Some(store.clone()))
        .unwrap();
    let first = live.run_cycle().await.unwrap();
    assert!(first.persisted());
    let rows_after_first = store.history_len().unwrap();
    assert!(rows_after_first > 0);

    let degraded = Aggregator::with_transport(
        &cfg,
        Arc::new(FixtureTransport::new(vec![])),
        Some(store.clone()),
    )
    .unwrap();
    let second = degraded.run_cycle().await.unwrap();
    assert!(second.persisted());

    // Latest is the second cycle, byte for byte.
    let latest = store.read_latest().unwrap().unwrap();
    assert_eq!(latest, second.snapshot);
    assert_ne!(latest.fingerprint, first.snapshot.fingerprint);

    // History keeps both cycles.
    assert!(store.history_len().unwrap() > rows_after_first);
    let gdp = store.history_for("gdp_growth", 100).unwrap();
    assert!(gdp.iter().any(|r| r.origin == Origin::Live.as_str()));
    assert!(gdp.iter().any(|r| r.origin == Origin::Fallback.as_str()));
    assert_eq!(gdp[0].cycle_ts, second.snapshot.timestamp.to_rfc3339());
}

#[tokio::test]
async fn latest_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("indicators.db");
    let cfg = fast_config();
    let snapshot = {
        let store = Arc::new(SqliteStore::open(&db).unwrap());
        let agg =
            Aggregator::with_transport(&cfg, Arc::new(all_sources_transport()), Some(store))
                .unwrap();
        agg.run_cycle().await.unwrap().snapshot
    };
    let reopened = SqliteStore::open(&db).unwrap();
    assert_eq!(reopened.read_latest().unwrap(), Some(snapshot));
}

#[tokio::test]
async fn store_failure_is_reported_alongside_the_snapshot() {
    let cfg = fast_config();
    let agg = Aggregator::with_transport(
        &cfg,
        Arc::new(all_sources_transport()),
        Some(Arc::new(MemoryStore::failing())),
    )
    .unwrap();
    let out = agg.run_cycle().await.unwrap();
    assert!(matches!(out.store_error, Some(StoreError::Write(_))));
    assert!(!out.snapshot.indicators.is_empty());
    assert_eq!(out.sources.len(), 9);
}
