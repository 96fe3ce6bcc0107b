// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;

/// Spawn a periodic aggregation loop. The first cycle runs immediately;
/// missed ticks are skipped, so cycles never pile up behind a slow one.
pub fn spawn_scheduler(aggregator: Arc<Aggregator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match aggregator.run_cycle().await {
                Ok(outcome) => tracing::info!(
                    target: "scheduler",
                    indicators = outcome.snapshot.indicators.len(),
                    fingerprint = %outcome.snapshot.fingerprint,
                    degraded = outcome.snapshot.is_fully_degraded(),
                    "scheduled cycle tick"
                ),
                Err(e) => {
                    // Only an empty registry gets here; retrying will not help.
                    tracing::error!(target: "scheduler", error = %e, "scheduled cycle failed, stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::ingest::config::{AggregatorConfig, SourceConfig, SourceKind};
    use crate::ingest::types::SourceAdapter;
    use crate::model::SourceResult;
    use crate::store::{MemoryStore, SnapshotStore};
    use async_trait::async_trait;
    use tokio::time::Instant;

    struct Down;

    #[async_trait]
    impl SourceAdapter for Down {
        fn source_id(&self) -> &str {
            "hcp"
        }
        async fn fetch(&self, _deadline: Instant) -> Result<SourceResult, AdapterError> {
            Err(AdapterError::unreachable("offline"))
        }
    }

    #[tokio::test]
    async fn runs_repeated_cycles_until_aborted() {
        let cfg = AggregatorConfig {
            sources: vec![SourceConfig::builtin(SourceKind::Hcp)],
            ..AggregatorConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let agg = Aggregator::new(&cfg, vec![Arc::new(Down)], Some(store.clone())).unwrap();

        let handle = spawn_scheduler(Arc::new(agg), Duration::from_millis(40));
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert!(store.history.lock().unwrap().len() >= 2);
        assert!(store.read_latest().unwrap().unwrap().is_fully_degraded());
    }

    #[tokio::test]
    async fn empty_registry_stops_the_loop() {
        let cfg = AggregatorConfig {
            sources: vec![],
            ..AggregatorConfig::default()
        };
        let agg = Aggregator::new(&cfg, vec![], None).unwrap();
        let handle = spawn_scheduler(Arc::new(agg), Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop on its own")
            .unwrap();
    }
}
