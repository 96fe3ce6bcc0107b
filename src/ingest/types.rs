// src/ingest/types.rs
use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::AdapterError;
use crate::model::SourceResult;

/// Knows how to acquire data from exactly one external source.
///
/// `deadline` is absolute so that adapters started at slightly different
/// moments still converge on one cutoff. A parse miss for one field is not
/// an error; only a response with no usable field at all is.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError>;
}

/// Raw body retrieval, separated so adapters can run against fixtures.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_text(&self, url: &str, deadline: Instant) -> Result<String, AdapterError>;
}
