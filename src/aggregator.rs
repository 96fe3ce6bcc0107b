//! One aggregation cycle, end to end:
//! acquire -> normalize -> consolidate -> persist.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};

use crate::consolidate::{Consolidator, OutlierPolicy};
use crate::error::{AggregationError, ConfigError, StoreError};
use crate::ingest::config::AggregatorConfig;
use crate::ingest::coordinator::{acquire_all, AcquireOptions, Acquired};
use crate::ingest::ensure_metrics_described;
use crate::ingest::fallback::FallbackProvider;
use crate::ingest::providers::build_adapter;
use crate::ingest::transport::HttpTransport;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::model::{AggregationSnapshot, CanonicalObservation, Origin};
use crate::normalize::KeyNormalizer;
use crate::store::{CacheWriter, SnapshotStore};

/// Everything one cycle produced.
///
/// A store failure does not hide the snapshot; it is reported next to it.
#[derive(Debug)]
pub struct CycleOutcome {
    pub snapshot: AggregationSnapshot,
    /// One entry per registered source, in registration order.
    pub sources: Vec<Acquired>,
    pub store_error: Option<StoreError>,
}

impl CycleOutcome {
    pub fn persisted(&self) -> bool {
        self.store_error.is_none()
    }
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    fallback: FallbackProvider,
    normalizer: KeyNormalizer,
    consolidator: Consolidator,
    writer: Option<CacheWriter>,
    options: AcquireOptions,
}

impl Aggregator {
    /// Production wiring: one shared HTTP transport for every adapter.
    pub fn from_config(
        cfg: &AggregatorConfig,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self, AggregationError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(cfg)?);
        Self::with_transport(cfg, transport, store)
    }

    /// Same adapters as production over a caller-supplied transport.
    pub fn with_transport(
        cfg: &AggregatorConfig,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self, AggregationError> {
        let adapters = cfg
            .enabled_sources()
            .map(|s| build_adapter(s, cfg, Arc::clone(&transport)))
            .collect();
        Self::new(cfg, adapters, store)
    }

    /// Explicit adapters. Fallback sets and mappings still come from `cfg`,
    /// keyed by each adapter's source id.
    pub fn new(
        cfg: &AggregatorConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self, AggregationError> {
        cfg.validate()?;
        let fallback = FallbackProvider::from_config(cfg)?;
        if let Some(a) = adapters.iter().find(|a| !fallback.covers(a.source_id())) {
            tracing::error!(source = a.source_id(), "adapter has no registered fallback set");
            return Err(ConfigError::MissingFallback(a.source_id().to_string()).into());
        }
        Ok(Self {
            adapters,
            fallback,
            normalizer: KeyNormalizer::from_config(cfg),
            consolidator: Consolidator::new(OutlierPolicy::from_config(cfg)),
            writer: store.map(CacheWriter::new),
            options: AcquireOptions::from_config(cfg),
        })
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.source_id()).collect()
    }

    pub fn store(&self) -> Option<&Arc<dyn SnapshotStore>> {
        self.writer.as_ref().map(|w| w.store())
    }

    /// Run one cycle. Fails only on an empty source registry.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, AggregationError> {
        ensure_metrics_described();
        let t0 = std::time::Instant::now();

        let sources = acquire_all(&self.adapters, &self.fallback, self.options).await?;

        let observations: Vec<CanonicalObservation> = sources
            .iter()
            .flat_map(|a| self.normalizer.normalize(&a.result))
            .collect();
        let snapshot = self
            .consolidator
            .snapshot(&sources, observations, Utc::now());

        let store_error = match &self.writer {
            Some(w) => w.persist(&snapshot).err(),
            None => None,
        };

        counter!("aggregation_cycles_total").increment(1);
        gauge!("aggregation_last_cycle_ts").set(Utc::now().timestamp() as f64);

        let live = sources
            .iter()
            .filter(|a| a.result.origin == Origin::Live)
            .count();
        tracing::info!(
            sources = sources.len(),
            live,
            fallback = sources.len() - live,
            indicators = snapshot.indicators.len(),
            persisted = store_error.is_none(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "aggregation cycle complete"
        );

        Ok(CycleOutcome {
            snapshot,
            sources,
            store_error,
        })
    }

    /// Blocking entry point for callers outside an async runtime.
    ///
    /// Spins up a runtime sized to the worker pool. Returns
    /// [`AggregationError::NestedRuntime`] when called from within a tokio
    /// runtime; use [`Aggregator::run_cycle`] there.
    pub fn run_cycle_blocking(&self) -> Result<CycleOutcome, AggregationError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(AggregationError::NestedRuntime);
        }
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.options.worker_pool_size.max(1))
            .enable_all()
            .build()
            .map_err(AggregationError::Runtime)?;
        let out = rt.block_on(self.run_cycle());
        // Detached workers that overran their deadline are not waited for.
        rt.shutdown_background();
        out
    }
}
