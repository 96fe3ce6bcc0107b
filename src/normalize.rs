//! # Key Normalizer
//!
//! Maps each source's provider-specific field names onto the canonical
//! indicator vocabulary and coerces readings to finite numbers.
//!
//! - Built-in table per source kind, merged with `[mapping.<source_id>]`
//!   overrides from config.
//! - A field without a mapping entry is dropped silently (debug log), unless
//!   it carries one of its source kind's breakdown prefixes (`sector.`,
//!   `region.`), in which case the field name is kept as the indicator.
//! - A mapped field that is not a finite number is dropped with a warning.
//! - At most one observation per (source, indicator): when several fields
//!   of one source map to the same indicator, the first in field-name
//!   order wins.
//!
//! Output depends only on the input values, never on parse or arrival order.

use std::collections::{BTreeMap, HashMap};

use metrics::counter;

use crate::ingest::config::{AggregatorConfig, SourceKind};
use crate::ingest::parse_number;
use crate::model::{CanonicalObservation, RawValue, SourceResult};

/// Canonical indicator names produced by the built-in table.
pub const CANONICAL_INDICATORS: &[&str] = &[
    "budget_deficit",
    "exchange_rate_eur",
    "exchange_rate_usd",
    "export_growth",
    "exports",
    "fdi_inflows",
    "gdp_growth",
    "gdp_nominal",
    "import_growth",
    "imports",
    "inflation_rate",
    "interest_rate",
    "money_supply",
    "population",
    "poverty_rate",
    "public_debt",
    "public_investment",
    "rural_unemployment",
    "tax_revenue",
    "trade_balance",
    "unemployment_rate",
    "urban_unemployment",
];

/// Field prefixes a source kind passes through unmapped: the field name is
/// its own indicator name.
pub fn breakdown_prefixes(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::Mef => &["sector.", "region."],
        _ => &[],
    }
}

/// Built-in field -> canonical table for a source kind.
pub fn builtin_mapping(kind: SourceKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        SourceKind::WorldBank => &[
            ("NY.GDP.MKTP.KD.ZG", "gdp_growth"),
            ("FP.CPI.TOTL.ZG", "inflation_rate"),
            ("SL.UEM.TOTL.ZS", "unemployment_rate"),
            ("GC.DOD.TOTL.GD.ZS", "public_debt"),
            ("SP.POP.TOTL", "population"),
            ("BX.KLT.DINV.CD.WD", "fdi_inflows"),
        ],
        SourceKind::Imf => &[
            ("NGDP_RPCH", "gdp_growth"),
            ("PCPIPCH", "inflation_rate"),
            ("LUR", "unemployment_rate"),
            ("GGXWDG_NGDP", "public_debt"),
        ],
        SourceKind::Ecb => &[("exchange_rate_eur", "exchange_rate_eur")],
        SourceKind::Mef => &[
            ("inflation", "inflation_rate"),
            ("public_debt", "public_debt"),
            ("budget_deficit", "budget_deficit"),
            ("gdp_growth", "gdp_growth"),
            ("unemployment", "unemployment_rate"),
            ("tax_revenue", "tax_revenue"),
            ("public_investment", "public_investment"),
        ],
        SourceKind::TradingEconomics => &[
            ("gdp_growth_rate", "gdp_growth"),
            ("unemployment_rate", "unemployment_rate"),
            ("inflation_rate", "inflation_rate"),
            ("interest_rate", "interest_rate"),
        ],
        SourceKind::BankAlMaghrib => &[
            ("inflation_rate", "inflation_rate"),
            ("key_rate", "interest_rate"),
            ("exchange_rate_usd", "exchange_rate_usd"),
            ("exchange_rate_eur", "exchange_rate_eur"),
            ("money_supply", "money_supply"),
        ],
        SourceKind::Hcp => &[
            ("gdp_growth", "gdp_growth"),
            ("unemployment_rate", "unemployment_rate"),
            ("urban_unemployment", "urban_unemployment"),
            ("rural_unemployment", "rural_unemployment"),
            ("population", "population"),
            ("gdp_nominal", "gdp_nominal"),
        ],
        SourceKind::Afdb => &[
            ("gdp_growth", "gdp_growth"),
            ("unemployment", "unemployment_rate"),
            ("poverty", "poverty_rate"),
        ],
        SourceKind::Customs => &[
            ("exports", "exports"),
            ("imports", "imports"),
            ("trade_balance", "trade_balance"),
            ("export_growth", "export_growth"),
            ("import_growth", "import_growth"),
        ],
    }
}

/// Interpret a raw value as a finite number.
pub fn coerce_number(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Number(v) => Some(*v).filter(|v| v.is_finite()),
        RawValue::Text(s) => parse_number(s),
    }
}

/// Static `{source_id: {field_name: canonical_name}}` table.
#[derive(Debug, Clone, Default)]
pub struct KeyNormalizer {
    tables: HashMap<String, BTreeMap<String, String>>,
    passthrough: HashMap<String, &'static [&'static str]>,
}

impl KeyNormalizer {
    /// Built-in table for each enabled source, with config overrides on top.
    /// Overrides for ids outside the registry are kept too.
    pub fn from_config(cfg: &AggregatorConfig) -> Self {
        let mut tables: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        let mut passthrough = HashMap::new();
        for source in cfg.enabled_sources() {
            let prefixes = breakdown_prefixes(source.kind);
            if !prefixes.is_empty() {
                passthrough.insert(source.id.clone(), prefixes);
            }
            let table = tables.entry(source.id.clone()).or_default();
            for (field, canonical) in builtin_mapping(source.kind) {
                table.insert(field.to_string(), canonical.to_string());
            }
        }
        for (source_id, overrides) in &cfg.mapping {
            let table = tables.entry(source_id.clone()).or_default();
            for (field, canonical) in overrides {
                table.insert(field.clone(), canonical.clone());
            }
        }
        Self {
            tables,
            passthrough,
        }
    }

    pub fn from_tables(tables: HashMap<String, BTreeMap<String, String>>) -> Self {
        Self {
            tables,
            passthrough: HashMap::new(),
        }
    }

    /// Explicit mapping first, then breakdown prefixes kept as-is.
    pub fn canonical_name<'a>(&'a self, source_id: &str, field: &'a str) -> Option<&'a str> {
        if let Some(name) = self.tables.get(source_id).and_then(|t| t.get(field)) {
            return Some(name.as_str());
        }
        self.passthrough
            .get(source_id)
            .filter(|prefixes| prefixes.iter().any(|p| field.starts_with(*p) && field.len() > p.len()))
            .map(|_| field)
    }

    /// Observations from one source result, in canonical-name order.
    pub fn normalize(&self, result: &SourceResult) -> Vec<CanonicalObservation> {
        let source_id = result.source_id.as_str();
        let mut by_indicator: BTreeMap<&str, CanonicalObservation> = BTreeMap::new();

        for (field, reading) in &result.fields {
            let Some(canonical) = self.canonical_name(source_id, field) else {
                tracing::debug!(source = source_id, field = %field, "unmapped field dropped");
                counter!("aggregation_fields_dropped_total", "reason" => "unmapped").increment(1);
                continue;
            };
            let Some(value) = coerce_number(&reading.value) else {
                tracing::warn!(
                    source = source_id,
                    field = %field,
                    value = ?reading.value,
                    "non-numeric field dropped"
                );
                counter!("aggregation_fields_dropped_total", "reason" => "non_numeric")
                    .increment(1);
                continue;
            };
            if by_indicator.contains_key(canonical) {
                tracing::debug!(
                    source = source_id,
                    field = %field,
                    indicator = canonical,
                    "indicator already observed for source"
                );
                continue;
            }
            by_indicator.insert(
                canonical,
                CanonicalObservation {
                    indicator: canonical.to_string(),
                    source_id: source_id.to_string(),
                    value,
                    unit: reading.unit.clone(),
                    period: reading.period.clone(),
                    origin: result.origin,
                },
            );
        }
        by_indicator.into_values().collect()
    }

    /// Observations for a whole cycle, sources kept in the order given.
    pub fn normalize_all(&self, results: &[SourceResult]) -> Vec<CanonicalObservation> {
        results.iter().flat_map(|r| self.normalize(r)).collect()
    }
}
