//! Error types for the aggregation engine.
//!
//! Two families:
//! - [`AdapterError`]: per-source, recoverable. The coordinator swallows these
//!   and substitutes the fallback set for that source.
//! - [`AggregationError`] / [`ConfigError`]: fatal, raised to the caller.
//!
//! [`StoreError`] sits in between: it is reported back with the snapshot,
//! never instead of it.

use thiserror::Error;

/// Failure of a single source adapter invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The deadline passed before the source answered.
    #[error("timed out")]
    Timeout,

    /// Network-level failure or a non-success HTTP status.
    #[error("unreachable: {reason}")]
    Unreachable { reason: String },

    /// The source answered, but nothing usable could be extracted.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },
}

impl AdapterError {
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable { .. } => "unreachable",
            Self::MalformedResponse { .. } => "malformed_response",
        }
    }

    /// Whether another attempt against the same source could help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unreachable { .. })
    }
}

/// Invalid static configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate source id: {0}")]
    DuplicateSource(String),

    #[error("source '{0}' has no fallback values")]
    MissingFallback(String),

    #[error("fallback value {source_id}.{field} is not a finite number")]
    InvalidFallback { source_id: String, field: String },

    #[error("worker_pool_size must be at least 1")]
    ZeroPoolSize,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("outlier_max_ratio must be a finite number above 1, got {0}")]
    InvalidOutlierRatio(f64),

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// Fatal errors that abort a cycle before any fetch starts.
#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("source registry is empty")]
    EmptySourceRegistry,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("run_cycle_blocking called from within a tokio runtime")]
    NestedRuntime,
}

/// Durable store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),

    #[error("store write failed: {0}")]
    Write(#[source] rusqlite::Error),

    #[error("store read failed: {0}")]
    Read(#[source] rusqlite::Error),

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_error_kinds_are_stable() {
        assert_eq!(AdapterError::Timeout.kind(), "timeout");
        assert_eq!(AdapterError::unreachable("dns").kind(), "unreachable");
        assert_eq!(
            AdapterError::malformed("no table").kind(),
            "malformed_response"
        );
    }

    #[test]
    fn only_network_failures_are_transient() {
        assert!(AdapterError::Timeout.is_transient());
        assert!(AdapterError::unreachable("503").is_transient());
        assert!(!AdapterError::malformed("bad json").is_transient());
    }

    #[test]
    fn config_error_converts_into_aggregation_error() {
        let e: AggregationError = ConfigError::ZeroPoolSize.into();
        assert!(matches!(e, AggregationError::Config(ConfigError::ZeroPoolSize)));
    }
}
