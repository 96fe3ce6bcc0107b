//! Cycle-scoped value types shared by every stage of the pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw value as the source delivered it. Some JSON endpoints quote numbers,
/// so the text form survives until the Key Normalizer coerces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

/// One field reading from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: RawValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Year or date label, e.g. "2023" or "2024-06".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

impl Reading {
    pub fn number(value: f64) -> Self {
        Self {
            value: RawValue::Number(value),
            unit: None,
            period: None,
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: RawValue::Text(value.into()),
            unit: None,
            period: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }
}

/// Where a [`SourceResult`] came from in this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Origin {
    Live,
    Fallback,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Live => "LIVE",
            Origin::Fallback => "FALLBACK",
        }
    }
}

/// Output of one adapter invocation (or of the fallback provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source_id: String,
    /// Ordered by field name so iteration never depends on parse order.
    pub fields: BTreeMap<String, Reading>,
    pub origin: Origin,
    pub fetched_at: DateTime<Utc>,
}

impl SourceResult {
    pub fn live(source_id: impl Into<String>, fields: BTreeMap<String, Reading>) -> Self {
        Self {
            source_id: source_id.into(),
            fields,
            origin: Origin::Live,
            fetched_at: Utc::now(),
        }
    }
}

/// A numeric reading tagged with the source that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalObservation {
    pub indicator: String,
    pub source_id: String,
    pub value: f64,
    pub unit: Option<String>,
    pub period: Option<String>,
    pub origin: Origin,
}

/// Per-source contribution kept on the consolidated indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub source_id: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub origin: Origin,
}

/// Final value for one canonical indicator.
///
/// Only built when at least one observation exists, so `value` is always a
/// real mean and never a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedIndicator {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub contributing_sources: Vec<String>,
    pub sample_count: usize,
    pub observations: Vec<ObservationRecord>,
}

/// LIVE/FALLBACK tag for one registered source in a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProvenance {
    pub source_id: String,
    pub origin: Origin,
    pub fetched_at: DateTime<Utc>,
    /// Why the fallback was used, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The complete outcome of one aggregation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSnapshot {
    pub timestamp: DateTime<Utc>,
    pub indicators: BTreeMap<String, ConsolidatedIndicator>,
    /// Registered sources that contributed at least one observation, in
    /// registration order.
    pub sources_used: Vec<String>,
    /// One entry per registered source, in registration order.
    pub provenance: Vec<SourceProvenance>,
    /// Hex SHA-256 over the serialized `indicators` map.
    pub fingerprint: String,
}

impl AggregationSnapshot {
    pub fn indicator(&self, name: &str) -> Option<&ConsolidatedIndicator> {
        self.indicators.get(name)
    }

    /// True when every registered source fell back this cycle.
    pub fn is_fully_degraded(&self) -> bool {
        !self.provenance.is_empty()
            && self
                .provenance
                .iter()
                .all(|p| p.origin == Origin::Fallback)
    }

    pub fn live_sources(&self) -> impl Iterator<Item = &str> {
        self.provenance
            .iter()
            .filter(|p| p.origin == Origin::Live)
            .map(|p| p.source_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_value_deserializes_numbers_and_strings() {
        let n: RawValue = serde_json::from_str("3.5").unwrap();
        let t: RawValue = serde_json::from_str("\"3,5 %\"").unwrap();
        assert_eq!(n, RawValue::Number(3.5));
        assert_eq!(t, RawValue::Text("3,5 %".into()));
    }

    #[test]
    fn origin_serializes_uppercase() {
        let s = serde_json::to_string(&Origin::Fallback).unwrap();
        assert_eq!(s, "\"FALLBACK\"");
        assert_eq!(Origin::Live.as_str(), "LIVE");
    }

    #[test]
    fn reading_builder_sets_unit_and_period() {
        let r = Reading::number(6.1).with_unit("%").with_period("2024");
        assert_eq!(r.unit.as_deref(), Some("%"));
        assert_eq!(r.period.as_deref(), Some("2024"));
    }
}
