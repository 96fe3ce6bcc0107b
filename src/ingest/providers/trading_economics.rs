// src/ingest/providers/trading_economics.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;

use super::{fetch_all, finish};
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::ingest::{normalize_text, parse_number};
use crate::model::{Reading, SourceResult};

pub const DEFAULT_BASE_URL: &str = "https://tradingeconomics.com";

/// Indicator page slugs; the field name is the slug with `_` for `-`.
const PAGES: &[&str] = &[
    "gdp-growth-rate",
    "unemployment-rate",
    "inflation-rate",
    "interest-rate",
];

static RE_VALUE_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<(div|span)\b[^>]*class\s*=\s*["'][^"']*(?:data-value|indicator-value|current-value)[^"']*["'][^>]*>(.*?)</(?:div|span)>"#,
    )
    .unwrap()
});

static RE_META_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta\s+[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']*)["']"#)
        .unwrap()
});

static RE_TO_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bto\s+(-?\d+(?:[.,]\d+)?)\s*(?:percent|%)").unwrap());

pub struct TradingEconomicsAdapter {
    id: String,
    base: String,
    country_slug: String,
    transport: Arc<dyn Transport>,
}

impl TradingEconomicsAdapter {
    pub fn new(
        id: impl Into<String>,
        base: Option<&str>,
        country_name: &str,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id: id.into(),
            base: base.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            country_slug: country_name.trim().to_lowercase().replace(' ', "-"),
            transport,
        }
    }
}

/// Headline value of an indicator page: the first value element holding a
/// number, else the "... to X percent" sentence of the meta description.
pub(crate) fn parse_headline(html: &str) -> Option<f64> {
    let from_element = RE_VALUE_ELEMENT
        .captures_iter(html)
        .filter_map(|c| c.get(2))
        .find_map(|m| parse_number(&normalize_text(m.as_str())));
    if from_element.is_some() {
        return from_element;
    }
    let description = RE_META_DESCRIPTION.captures(html)?.get(1)?.as_str();
    let text = normalize_text(description);
    RE_TO_PERCENT
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_number(m.as_str()))
}

#[async_trait]
impl SourceAdapter for TradingEconomicsAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let requests = PAGES
            .iter()
            .map(|&slug| (slug, format!("{}/{}/{}", self.base, self.country_slug, slug)))
            .collect();
        let mut fields = BTreeMap::new();
        let mut last_err = None;
        for (slug, body) in fetch_all(self.transport.as_ref(), requests, deadline).await {
            match body {
                Ok(html) => match parse_headline(&html) {
                    Some(v) => {
                        fields.insert(slug.replace('-', "_"), Reading::number(v).with_unit("%"));
                    }
                    None => {
                        tracing::debug!(source = %self.id, page = slug, "no headline value");
                        last_err = Some(AdapterError::malformed(format!("no value on {slug}")));
                    }
                },
                Err(e) => {
                    tracing::debug!(source = %self.id, page = slug, error = %e, "page failed");
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
    use crate::model::RawValue;

    #[test]
    fn value_element_wins() {
        let html = r#"<html><span class="te-current-value big">&nbsp;</span>
            <div class="data-value">13.10 %</div></html>"#;
        assert_eq!(parse_headline(html), Some(13.1));
    }

    #[test]
    fn meta_description_is_the_fallback() {
        let html = r#"<head><meta name="description" content="Morocco Interest Rate - values, historical data. The benchmark interest rate in Morocco was last recorded at 2.75 percent. It was cut to 2.50 percent in March."></head>"#;
        assert_eq!(parse_headline(html), Some(2.5));
    }

    #[test]
    fn page_without_value_yields_none() {
        assert_eq!(parse_headline("<p>Access denied</p>"), None);
    }

    #[tokio::test]
    async fn field_names_follow_page_slugs() {
        let transport = Arc::new(FixtureTransport {
            routes: vec![
                ("/morocco/inflation-rate", r#"<div class="current-value">0,9</div>"#.to_string()),
                ("/morocco/interest-rate", "<p>blocked</p>".to_string()),
            ],
        });
        let a = TradingEconomicsAdapter::new("te", None, "Morocco", transport);
        let r = a.fetch(far_deadline()).await.unwrap();
        assert_eq!(r.fields.len(), 1);
        assert_eq!(r.fields["inflation_rate"].value, RawValue::Number(0.9));
    }
}
