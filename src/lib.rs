// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregator;
pub mod consolidate;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{Aggregator, CycleOutcome};
pub use crate::error::{AdapterError, AggregationError, ConfigError, StoreError};
pub use crate::ingest::config::{AggregatorConfig, SourceConfig, SourceKind};
pub use crate::ingest::types::{SourceAdapter, Transport};
pub use crate::model::{AggregationSnapshot, ConsolidatedIndicator, Origin, Reading, SourceResult};
pub use crate::store::{CacheWriter, SnapshotStore, SqliteStore};
