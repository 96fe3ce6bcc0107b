// src/ingest/providers/world_bank.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use super::{fetch_all, finish};
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::model::{Reading, SourceResult};

pub const DEFAULT_BASE_URL: &str = "https://api.worldbank.org/v2";

/// WDI indicator codes fetched per cycle, with their units.
const INDICATORS: &[(&str, &str)] = &[
    ("NY.GDP.MKTP.KD.ZG", "%"),
    ("FP.CPI.TOTL.ZG", "%"),
    ("SL.UEM.TOTL.ZS", "%"),
    ("GC.DOD.TOTL.GD.ZS", "% of GDP"),
    ("SP.POP.TOTL", "people"),
    ("BX.KLT.DINV.CD.WD", "USD"),
];

pub struct WorldBankAdapter {
    id: String,
    base: String,
    country: String,
    transport: Arc<dyn Transport>,
}

impl WorldBankAdapter {
    pub fn new(
        id: impl Into<String>,
        base: Option<&str>,
        country: &str,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id: id.into(),
            base: base.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            country: country.to_string(),
            transport,
        }
    }

    fn url(&self, code: &str) -> String {
        format!(
            "{}/country/{}/indicator/{}?format=json&per_page=10&mrv=5",
            self.base, self.country, code
        )
    }
}

/// The API answers `[paging, [observation, ...]]`, newest first. Recent
/// years are often null until published, so take the first non-null value.
pub(crate) fn parse_series(body: &str, unit: &str) -> Result<Option<Reading>, AdapterError> {
    let doc: Value = serde_json::from_str(body)
        .map_err(|e| AdapterError::malformed(format!("world bank json: {e}")))?;
    let Some(rows) = doc.get(1).and_then(Value::as_array) else {
        // An error payload comes back as `[{"message": [...]}]`.
        return Err(AdapterError::malformed("world bank payload has no data page"));
    };
    let latest = rows.iter().find_map(|row| {
        let value = row.get("value").and_then(Value::as_f64)?;
        let period = row.get("date").and_then(Value::as_str);
        let mut r = Reading::number(value).with_unit(unit);
        if let Some(p) = period {
            r = r.with_period(p);
        }
        Some(r)
    });
    Ok(latest)
}

#[async_trait]
impl SourceAdapter for WorldBankAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let requests = INDICATORS
            .iter()
            .map(|&(code, unit)| ((code, unit), self.url(code)))
            .collect();
        let mut fields = BTreeMap::new();
        let mut last_err = None;
        for ((code, unit), body) in fetch_all(self.transport.as_ref(), requests, deadline).await {
            match body.and_then(|b| parse_series(&b, unit)) {
                Ok(Some(reading)) => {
                    fields.insert(code.to_string(), reading);
                }
                Ok(None) => tracing::debug!(source = %self.id, code, "no recent value"),
                Err(e) => {
                    tracing::debug!(source = %self.id, code, error = %e, "indicator failed");
                    last_err = Some(e);
                }
            }
        }
        finish(&self.id, fields, last_err)
    }
}
