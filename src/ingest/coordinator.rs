// src/ingest/coordinator.rs
//! Acquisition Coordinator.
//!
//! Runs every registered adapter concurrently on a bounded pool, enforces one
//! global deadline plus a per-source timeout, and returns exactly one
//! [`SourceResult`] per registered source, in registration order.
//!
//! A source that fails or misses its deadline is replaced by its fallback set
//! as soon as the failure is known. Workers that overrun are detached, not
//! aborted: their eventual output is ignored.
//!
//! Adapters are handed a deadline slightly earlier than the one the supervisor
//! enforces, so whatever they assembled by their own cutoff still arrives.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

use crate::error::{AdapterError, AggregationError};
use crate::ingest::config::AggregatorConfig;
use crate::ingest::fallback::FallbackProvider;
use crate::ingest::types::SourceAdapter;
use crate::model::SourceResult;

/// Timing and pool parameters, lifted from [`AggregatorConfig`].
#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    pub global_deadline: Duration,
    pub per_source_timeout: Duration,
    pub worker_pool_size: usize,
}

impl AcquireOptions {
    pub fn from_config(cfg: &AggregatorConfig) -> Self {
        Self {
            global_deadline: cfg.global_deadline(),
            per_source_timeout: cfg.per_source_timeout(),
            worker_pool_size: cfg.worker_pool_size.max(1),
        }
    }
}

/// Upper bound on the gap between the adapter's cutoff and the supervisor's.
const MAX_HANDOFF_MARGIN: Duration = Duration::from_millis(250);

/// Time reserved for an adapter to hand back partial results: a tenth of its
/// budget, capped at [`MAX_HANDOFF_MARGIN`].
fn handoff_margin(budget: Duration) -> Duration {
    (budget / 10).min(MAX_HANDOFF_MARGIN)
}

/// One source's outcome, with the reason a fallback was used (if any).
#[derive(Debug, Clone)]
pub struct Acquired {
    pub result: SourceResult,
    pub error: Option<AdapterError>,
}

/// Run all adapters and collect one result per source.
///
/// Fails only when `adapters` is empty. Individual failures never escape.
pub async fn acquire_all(
    adapters: &[Arc<dyn SourceAdapter>],
    fallback: &FallbackProvider,
    opts: AcquireOptions,
) -> Result<Vec<Acquired>, AggregationError> {
    if adapters.is_empty() {
        return Err(AggregationError::EmptySourceRegistry);
    }

    let global_deadline = Instant::now() + opts.global_deadline;
    let pool = Arc::new(Semaphore::new(opts.worker_pool_size.max(1)));

    let mut set = JoinSet::new();
    for (idx, adapter) in adapters.iter().enumerate() {
        let adapter = Arc::clone(adapter);
        let pool = Arc::clone(&pool);
        set.spawn(async move {
            let outcome =
                supervise(adapter, pool, global_deadline, opts.per_source_timeout).await;
            (idx, outcome)
        });
    }

    // Keyed by registration index: completion order never affects the result.
    let mut slots: Vec<Option<Acquired>> = vec![None; adapters.len()];
    while let Some(joined) = set.join_next().await {
        let (idx, outcome) = match joined {
            Ok(v) => v,
            Err(e) => {
                // Supervisors do not panic; if one does, its slot falls back below.
                tracing::error!(target: "acquire", error = ?e, "supervisor task failed");
                continue;
            }
        };
        let source_id = adapters[idx].source_id();
        slots[idx] = Some(settle(source_id, outcome, fallback));
    }

    let acquired = slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.unwrap_or_else(|| {
                settle(
                    adapters[idx].source_id(),
                    Err(AdapterError::unreachable("supervisor task lost")),
                    fallback,
                )
            })
        })
        .collect();
    Ok(acquired)
}

/// Wait for a pool slot, run the adapter in its own task, and stop waiting
/// at the source's deadline.
async fn supervise(
    adapter: Arc<dyn SourceAdapter>,
    pool: Arc<Semaphore>,
    global_deadline: Instant,
    per_source_timeout: Duration,
) -> Result<SourceResult, AdapterError> {
    // Queued behind the pool, but never past the global cutoff.
    let permit = match timeout_at(global_deadline, pool.acquire_owned()).await {
        Ok(Ok(p)) => p,
        Ok(Err(_closed)) => return Err(AdapterError::unreachable("worker pool closed")),
        Err(_) => return Err(AdapterError::Timeout),
    };

    let started = Instant::now();
    let deadline = (started + per_source_timeout).min(global_deadline);
    let adapter_deadline = deadline - handoff_margin(deadline.saturating_duration_since(started));

    let worker = tokio::spawn(async move {
        let _permit = permit;
        adapter.fetch(adapter_deadline).await
    });

    let outcome = match timeout_at(deadline, worker).await {
        Ok(Ok(res)) => res,
        Ok(Err(join_err)) => Err(AdapterError::unreachable(format!(
            "adapter task aborted: {join_err}"
        ))),
        // Dropping the JoinHandle detaches the worker; it is not killed.
        Err(_) => Err(AdapterError::Timeout),
    };

    histogram!("aggregation_fetch_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
    outcome
}

/// Turn a raw outcome into a final per-source result, substituting the
/// fallback set on any failure or on an empty live result.
fn settle(
    source_id: &str,
    outcome: Result<SourceResult, AdapterError>,
    fallback: &FallbackProvider,
) -> Acquired {
    let outcome = outcome.and_then(|mut r| {
        if r.fields.is_empty() {
            return Err(AdapterError::malformed("no usable fields"));
        }
        // The registry id is authoritative, whatever the adapter stamped.
        r.source_id = source_id.to_string();
        Ok(r)
    });

    match outcome {
        Ok(result) => {
            counter!("aggregation_source_live_total").increment(1);
            tracing::info!(
                target: "acquire",
                source = source_id,
                fields = result.fields.len(),
                "live data acquired"
            );
            Acquired {
                result,
                error: None,
            }
        }
        Err(err) => {
            counter!("aggregation_source_fallback_total").increment(1);
            tracing::warn!(
                target: "acquire",
                source = source_id,
                kind = err.kind(),
                error = %err,
                "source failed, using fallback"
            );
            Acquired {
                result: fallback.fallback(source_id),
                error: Some(err),
            }
        }
    }
}
