// src/ingest/providers/mef.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use super::{fetch_all, finish};
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::ingest::{parse_number_in, NumberLocale};
use crate::model::{RawValue, Reading, SourceResult};

pub const DEFAULT_BASE_URL: &str = "https://api.finances.gov.ma/v1";

pub struct MefAdapter {
    id: String,
    base: String,
    transport: Arc<dyn Transport>,
}

impl MefAdapter {
    pub fn new(id: impl Into<String>, base: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            base: base.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            transport,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Entry {
    value: Value,
    year: Value,
    #[serde(default)]
    unit: Option<String>,
}

/// Endpoints read per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Macro,
    Sectors,
    Regions,
}

impl Feed {
    const ALL: [Feed; 3] = [Feed::Macro, Feed::Sectors, Feed::Regions];

    fn path(self) -> &'static str {
        match self {
            Feed::Macro => "macro-economic",
            Feed::Sectors => "sectors",
            Feed::Regions => "regions",
        }
    }

    fn parse(self, body: &str) -> Result<BTreeMap<String, Reading>, AdapterError> {
        match self {
            Feed::Macro => parse_macro(body),
            Feed::Sectors => parse_breakdown(body, "sector"),
            Feed::Regions => parse_breakdown(body, "region"),
        }
    }
}

/// `{key: {value, year, unit}}`. Entries without both `value` and `year`
/// are skipped. Quoted values are read with French separators; text that
/// holds no number stays raw and is dropped at normalization.
pub(crate) fn parse_macro(body: &str) -> Result<BTreeMap<String, Reading>, AdapterError> {
    let doc: BTreeMap<String, Value> = serde_json::from_str(body)
        .map_err(|e| AdapterError::malformed(format!("mef json: {e}")))?;

    let mut out = BTreeMap::new();
    for (key, v) in doc {
        let Ok(entry) = serde_json::from_value::<Entry>(v) else {
            continue;
        };
        let value = match entry.value {
            Value::Number(n) => match n.as_f64() {
                Some(f) => RawValue::Number(f),
                None => continue,
            },
            Value::String(s) => match parse_number_in(&s, NumberLocale::French) {
                Some(f) => RawValue::Number(f),
                None => RawValue::Text(s),
            },
            _ => continue,
        };
        let period = match entry.year {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        out.insert(
            key,
            Reading {
                value,
                unit: Some(entry.unit.unwrap_or_else(|| "%".to_string())),
                period: Some(period),
            },
        );
    }
    Ok(out)
}

/// `{name: {contribution: {year: value, unit?}, ...}}` from the sector and
/// region feeds. Each entry becomes `<prefix>.<slug>` holding its latest
/// year's share.
pub(crate) fn parse_breakdown(
    body: &str,
    prefix: &str,
) -> Result<BTreeMap<String, Reading>, AdapterError> {
    let doc: BTreeMap<String, Value> = serde_json::from_str(body)
        .map_err(|e| AdapterError::malformed(format!("mef {prefix} json: {e}")))?;

    let mut out = BTreeMap::new();
    for (name, entry) in doc {
        let Some(contribution) = entry.get("contribution").and_then(Value::as_object) else {
            continue;
        };
        let latest = contribution
            .iter()
            .filter_map(|(year, v)| Some((year.parse::<i32>().ok()?, v.as_f64()?)))
            .max_by_key(|(year, _)| *year);
        let Some((year, share)) = latest else {
            continue;
        };
        let unit = contribution
            .get("unit")
            .and_then(Value::as_str)
            .unwrap_or("% of GDP");
        out.insert(
            format!("{prefix}.{}", slug(&name)),
            Reading::number(share).with_unit(unit).with_period(year.to_string()),
        );
    }
    Ok(out)
}

/// `"Agriculture, Forestry & Fishing"` -> `agriculture_forestry_fishing`.
fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl SourceAdapter for MefAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let requests = Feed::ALL
            .iter()
            .map(|&feed| (feed, format!("{}/{}", self.base, feed.path())))
            .collect();
        let mut fields = BTreeMap::new();
        let mut last_err = None;
        for (feed, body) in fetch_all(self.transport.as_ref(), requests, deadline).await {
            match body.and_then(|b| feed.parse(&b)) {
                Ok(parsed) => fields.extend(parsed),
                Err(e) => {
                    tracing::debug!(source = %self.id, feed = feed.path(), error = %e, "feed failed");
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

    use crate::ingest::providers::testing::{far_deadline, FixtureTransport};

    #[test]
    fn keeps_numbers_and_quoted_values() {
        let body = r#"{
            "inflation": {"value": 1.8, "year": "2023", "unit": "%"},
            "public_debt": {"value": "65,3", "year": 2023, "unit": "% du PIB"},
            "budget_deficit": {"value": -4.4, "year": "2023"},
            "public_investment": {"value": "190,500", "year": 2023, "unit": "milliards de MAD"},
            "outlook": {"value": "en cours", "year": 2024},
            "broken": {"value": 1.0},
            "note": "not an entry"
        }"#;
        let f = parse_macro(body).unwrap();
        assert_eq!(f.len(), 5);
        assert_eq!(f["inflation"].value, RawValue::Number(1.8));
        assert_eq!(f["public_debt"].value, RawValue::Number(65.3));
        assert_eq!(f["public_investment"].value, RawValue::Number(190.5));
        assert_eq!(f["outlook"].value, RawValue::Text("en cours".into()));
        assert_eq!(f["public_debt"].period.as_deref(), Some("2023"));
        assert_eq!(f["budget_deficit"].unit.as_deref(), Some("%"));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        assert_eq!(parse_macro("[1,2]").unwrap_err().kind(), "malformed_response");
        assert_eq!(
            parse_breakdown("[1,2]", "sector").unwrap_err().kind(),
            "malformed_response"
        );
    }

    const SECTORS: &str = r#"{
        "Agriculture, Forestry & Fishing": {
            "contribution": {"2022": 11.9, "2023": 12.4, "unit": "% du PIB"},
            "sub_sectors": {"Cereals": {"2023": 4.1}}
        },
        "Tourism": {"contribution": {"2023": 8.4}},
        "Unknown": {"key_indicators": {}}
    }"#;

    #[test]
    fn breakdown_keeps_the_latest_share_per_entry() {
        let f = parse_breakdown(SECTORS, "sector").unwrap();
        assert_eq!(f.len(), 2);
        let agri = &f["sector.agriculture_forestry_fishing"];
        assert_eq!(agri.value, RawValue::Number(12.4));
        assert_eq!(agri.period.as_deref(), Some("2023"));
        assert_eq!(agri.unit.as_deref(), Some("% du PIB"));
        assert_eq!(f["sector.tourism"].unit.as_deref(), Some("% of GDP"));
    }

    #[test]
    fn slugs_keep_accented_letters() {
        assert_eq!(slug("Rabat-Salé-Kénitra"), "rabat_salé_kénitra");
        assert_eq!(slug("  Souss  Massa "), "souss_massa");
    }

    #[tokio::test]
    async fn feeds_are_merged_and_each_may_fail_alone() {
        let transport = Arc::new(FixtureTransport {
            routes: vec![
                ("/macro-economic", r#"{"inflation": {"value": 1.8, "year": 2023}}"#.to_string()),
                ("/sectors", SECTORS.to_string()),
            ],
        });
        let a = MefAdapter::new("mef", Some("http://mef.test/v1/"), transport);
        let r = a.fetch(far_deadline()).await.unwrap();
        assert_eq!(r.fields.len(), 3);
        assert!(r.fields.contains_key("inflation"));
        assert!(r.fields.contains_key("sector.tourism"));
        assert!(!r.fields.keys().any(|k| k.starts_with("region.")));
    }
}
