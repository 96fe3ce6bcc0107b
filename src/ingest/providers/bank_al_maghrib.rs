// src/ingest/providers/bank_al_maghrib.rs
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::time::Instant;

use super::{extract_labelled, finish, LabelledPattern};
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::ingest::NumberLocale;
use crate::model::SourceResult;

pub const DEFAULT_URL: &str =
    "https://www.bkam.ma/Marches-et-statistiques/Statistiques/Statistiques-monetaires-et-financieres";

// Page text is bilingual; labels match French and English. Figures are
// always written the French way.
static PATTERNS: Lazy<Vec<LabelledPattern>> = Lazy::new(|| {
    vec![
        LabelledPattern::new(
            "inflation_rate",
            "%",
            r"(?i)inflation[^0-9%\-−]{0,40}(-?\d+(?:[.,]\d+)?)\s*%",
        ),
        LabelledPattern::new(
            "key_rate",
            "%",
            r"(?i)(?:taux\s+directeur|key\s+(?:policy\s+)?rate|policy\s+rate)[^0-9%]{0,40}(\d+(?:[.,]\d+)?)\s*%",
        ),
        LabelledPattern::new(
            "exchange_rate_eur",
            "MAD per EUR",
            r"(?i)\b(?:EUR|euro)\b[^0-9]{0,20}(\d+(?:[.,]\d+)?)",
        ),
        LabelledPattern::new(
            "exchange_rate_usd",
            "MAD per USD",
            r"(?i)\b(?:USD|dollar(?:\s+US)?)\b[^0-9]{0,20}(\d+(?:[.,]\d+)?)",
        ),
        LabelledPattern::new(
            "money_supply",
            "billion MAD",
            r"(?i)(?:masse\s+mon[ée]taire|money\s+supply)(?:\s*\(M3\))?[^0-9]{0,30}(\d[\d\s.,]*\d|\d)",
        ),
    ]
});

pub struct BankAlMaghribAdapter {
    id: String,
    url: String,
    transport: Arc<dyn Transport>,
}

impl BankAlMaghribAdapter {
    pub fn new(id: impl Into<String>, url: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            url: url.unwrap_or(DEFAULT_URL).to_string(),
            transport,
        }
    }
}

#[async_trait]
impl SourceAdapter for BankAlMaghribAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let html = self.transport.get_text(&self.url, deadline).await?;
        let fields = extract_labelled(&self.id, &html, &PATTERNS, NumberLocale::French);
        finish(&self.id, fields, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::providers::testing::{far_deadline, FixtureTransport};
    use crate::model::RawValue;

    const PAGE: &str = r#"<div class="stat"><h3>Taux directeur</h3><span>2,75%</span></div>
        <div class="indicator">Inflation (glissement annuel) : <b>0,9 %</b></div>
        <table><tr><td>EUR</td><td>10,8123</td></tr><tr><td>USD</td><td>9,9871</td></tr></table>
        <div class="indicator">Masse monétaire (M3) : <b>1.712,400</b> milliards de dirhams</div>"#;

    #[tokio::test]
    async fn extracts_rates_from_statistics_page() {
        let transport = Arc::new(FixtureTransport {
            routes: vec![("bkam.test", PAGE.to_string())],
        });
        let a = BankAlMaghribAdapter::new("bam", Some("http://bkam.test/stats"), transport);
        let r = a.fetch(far_deadline()).await.unwrap();
        assert_eq!(r.fields["key_rate"].value, RawValue::Number(2.75));
        assert_eq!(r.fields["inflation_rate"].value, RawValue::Number(0.9));
        assert_eq!(r.fields["exchange_rate_eur"].value, RawValue::Number(10.8123));
        assert_eq!(r.fields["exchange_rate_usd"].value, RawValue::Number(9.9871));
        assert_eq!(r.fields["money_supply"].value, RawValue::Number(1712.4));
        assert_eq!(r.fields["money_supply"].unit.as_deref(), Some("billion MAD"));
    }

    #[tokio::test]
    async fn page_without_figures_is_malformed() {
        let transport = Arc::new(FixtureTransport {
            routes: vec![("bkam.test", "<html>maintenance</html>".to_string())],
        });
        let a = BankAlMaghribAdapter::new("bam", Some("http://bkam.test/"), transport);
        let err = a.fetch(far_deadline()).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }
}
