// src/ingest/providers/hcp.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;

use super::finish;
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::ingest::{normalize_text, parse_number_in, NumberLocale};
use crate::model::{Reading, SourceResult};

pub const DEFAULT_URL: &str = "https://www.hcp.ma/Indicateurs-du-Haut-Commissariat-au-Plan_a673.html";

static RE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static RE_CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<t[dh]\b[^>]*>(.*?)</t[dh]>").unwrap());
static RE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([-−]?\d+(?:[.,]\d+)?)\s*%").unwrap());

/// (row label keywords, field, unit). A row feeds the first label it
/// matches, so narrower labels come first. Percent rows take the first
/// percentage; other rows take the last numeric cell.
const LABELS: &[(&[&str], &str, &str)] = &[
    (
        &["chômage urbain", "chomage urbain", "milieu urbain", "urban unemployment"],
        "urban_unemployment",
        "%",
    ),
    (
        &["chômage rural", "chomage rural", "milieu rural", "rural unemployment"],
        "rural_unemployment",
        "%",
    ),
    (&["chômage", "chomage", "unemployment"], "unemployment_rate", "%"),
    (&["pib nominal", "nominal gdp"], "gdp_nominal", "billion USD"),
    (&["croissance", "growth"], "gdp_growth", "%"),
    (&["population"], "population", "people"),
];

pub struct HcpAdapter {
    id: String,
    url: String,
    transport: Arc<dyn Transport>,
}

impl HcpAdapter {
    pub fn new(id: impl Into<String>, url: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            url: url.unwrap_or(DEFAULT_URL).to_string(),
            transport,
        }
    }
}

/// Scan table rows; the first row carrying a value for a field wins.
pub(crate) fn parse_rows(html: &str) -> BTreeMap<String, Reading> {
    let mut out = BTreeMap::new();
    for row in RE_ROW.captures_iter(html).filter_map(|c| c.get(1)) {
        let text = normalize_text(row.as_str());
        let lower = text.to_lowercase();
        let Some((_, field, unit)) = LABELS
            .iter()
            .find(|(keywords, _, _)| keywords.iter().any(|k| lower.contains(k)))
        else {
            continue;
        };
        if out.contains_key(*field) {
            continue;
        }
        let value = if *unit == "%" {
            RE_PERCENT
                .captures(&text)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_number_in(m.as_str(), NumberLocale::French))
        } else {
            last_numeric_cell(row.as_str())
        };
        if let Some(v) = value {
            out.insert(field.to_string(), Reading::number(v).with_unit(*unit));
        }
    }
    out
}

fn last_numeric_cell(row: &str) -> Option<f64> {
    RE_CELL
        .captures_iter(row)
        .filter_map(|c| c.get(1))
        .filter_map(|m| parse_number_in(&normalize_text(m.as_str()), NumberLocale::French))
        .last()
}

#[async_trait]
impl SourceAdapter for HcpAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let html = self.transport.get_text(&self.url, deadline).await?;
        finish(&self.id, parse_rows(&html), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawValue;

    #[test]
    fn reads_labelled_rows() {
        let html = r#"<table>
            <tr><th>Indicateur</th><th>Valeur</th></tr>
            <tr><td>Taux de chômage national</td><td>13,3&nbsp;%</td></tr>
            <tr><td>Taux de chômage urbain</td><td>16,9 %</td></tr>
            <tr><td>Croissance économique</td><td>3,2%</td></tr>
        </table>"#;
        let f = parse_rows(html);
        assert_eq!(f["unemployment_rate"].value, RawValue::Number(13.3));
        assert_eq!(f["urban_unemployment"].value, RawValue::Number(16.9));
        assert_eq!(f["gdp_growth"].value, RawValue::Number(3.2));
        assert!(!f.contains_key("rural_unemployment"));
    }

    #[test]
    fn narrower_label_wins_whatever_the_row_order() {
        let html = r#"<table>
            <tr><td>Taux de chômage en milieu rural</td><td>4,8 %</td></tr>
            <tr><td>Taux de chômage</td><td>13,1 %</td></tr>
        </table>"#;
        let f = parse_rows(html);
        assert_eq!(f["rural_unemployment"].value, RawValue::Number(4.8));
        assert_eq!(f["unemployment_rate"].value, RawValue::Number(13.1));
    }

    #[test]
    fn amount_rows_take_the_last_numeric_cell() {
        let html = r#"<table>
            <tr><td>Population légale</td><td>2024</td><td>36&nbsp;828&nbsp;330</td></tr>
            <tr><td>PIB nominal (milliards USD)</td><td>2023</td><td>141,1</td></tr>
        </table>"#;
        let f = parse_rows(html);
        assert_eq!(f["population"].value, RawValue::Number(36_828_330.0));
        assert_eq!(f["population"].unit.as_deref(), Some("people"));
        assert_eq!(f["gdp_nominal"].value, RawValue::Number(141.1));
        assert_eq!(f["gdp_nominal"].unit.as_deref(), Some("billion USD"));
    }

    #[test]
    fn rows_without_percent_are_skipped() {
        let html = "<tr><td>Chômage</td><td>en cours</td></tr>";
        assert!(parse_rows(html).is_empty());
    }
}
