// src/ingest/providers/imf.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::Value;
use tokio::time::Instant;

use super::{fetch_all, finish};
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::model::{Reading, SourceResult};

pub const DEFAULT_BASE_URL: &str = "https://www.imf.org/external/datamapper/api/v1";

const INDICATORS: &[(&str, &str)] = &[
    ("NGDP_RPCH", "%"),
    ("PCPIPCH", "%"),
    ("LUR", "%"),
    ("GGXWDG_NGDP", "% of GDP"),
];

pub struct ImfAdapter {
    id: String,
    base: String,
    country: String,
    transport: Arc<dyn Transport>,
}

impl ImfAdapter {
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
}

/// DataMapper returns `values.CODE.COUNTRY.{year: value}` including WEO
/// projections; keep the latest year not after `current_year`.
pub(crate) fn parse_latest(
    body: &str,
    code: &str,
    country: &str,
    unit: &str,
    current_year: i32,
) -> Result<Option<Reading>, AdapterError> {
    let doc: Value = serde_json::from_str(body)
        .map_err(|e| AdapterError::malformed(format!("imf json: {e}")))?;
    let Some(series) = doc
        .get("values")
        .and_then(|v| v.get(code))
        .and_then(|v| v.get(country))
        .and_then(Value::as_object)
    else {
        return Ok(None);
    };

    let latest = series
        .iter()
        .filter_map(|(year, v)| Some((year.parse::<i32>().ok()?, v.as_f64()?)))
        .filter(|(year, _)| *year <= current_year)
        .max_by_key(|(year, _)| *year);

    Ok(latest.map(|(year, v)| Reading::number(v).with_unit(unit).with_period(year.to_string())))
}

#[async_trait]
impl SourceAdapter for ImfAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let year = Utc::now().year();
        let requests = INDICATORS
            .iter()
            .map(|&(code, unit)| ((code, unit), format!("{}/{}/{}", self.base, code, self.country)))
            .collect();
        let mut fields = BTreeMap::new();
        let mut last_err = None;
        for ((code, unit), body) in fetch_all(self.transport.as_ref(), requests, deadline).await {
            match body.and_then(|b| parse_latest(&b, code, &self.country, unit, year)) {
                Ok(Some(reading)) => {
                    fields.insert(code.to_string(), reading);
                }
                Ok(None) => tracing::debug!(source = %self.id, code, "series missing"),
                Err(e) => {
                    tracing::debug!(source = %self.id, code, error = %e, "indicator failed");
                    last_err = Some(e);
                }
            }
        }
        finish(&self.id, fields, last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawValue;

    const BODY: &str = r#"{"values":{"LUR":{"MAR":{"2021":12.3,"2022":11.8,"2023":13.0,"2029":9.9}}},
        "api":{"version":"1","output-method":"json"}}"#;

    #[test]
    fn projections_after_current_year_are_ignored() {
        let r = parse_latest(BODY, "LUR", "MAR", "%", 2024).unwrap().unwrap();
        assert_eq!(r.value, RawValue::Number(13.0));
        assert_eq!(r.period.as_deref(), Some("2023"));
    }

    #[test]
    fn unknown_country_is_absent_not_error() {
        assert!(parse_latest(BODY, "LUR", "TUN", "%", 2024).unwrap().is_none());
    }

    #[test]
    fn html_error_page_is_malformed() {
        let err = parse_latest("<html>503</html>", "LUR", "MAR", "%", 2024).unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }
}
