// src/ingest/providers/customs.rs
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
    "https://www.oc.gov.ma/fr/etudes-et-statistiques/indicateurs-mensuels-des-echanges-exterieurs";

// Amounts must be followed by a magnitude word so the growth lines, which
// share the labels, never feed them.
static PATTERNS: Lazy<Vec<LabelledPattern>> = Lazy::new(|| {
    vec![
        LabelledPattern::new(
            "exports",
            "billion USD",
            r"(?i)\b(?:exportations|exports)\b[^0-9%+\-−]{0,40}(\d[\d\s.,]*\d|\d)\s*(?:milliards|billion|mds?)\b",
        ),
        LabelledPattern::new(
            "imports",
            "billion USD",
            r"(?i)\b(?:importations|imports)\b[^0-9%+\-−]{0,40}(\d[\d\s.,]*\d|\d)\s*(?:milliards|billion|mds?)\b",
        ),
        LabelledPattern::new(
            "trade_balance",
            "billion USD",
            r"(?i)(?:solde\s+commercial|trade\s+balance)[^0-9%\-−]{0,40}([-−]?\s?\d[\d\s.,]*\d|[-−]?\d)\s*(?:milliards|billion|mds?)\b",
        ),
        LabelledPattern::new(
            "export_growth",
            "%",
            r"(?i)(?:[ée]volution|variation|croissance|growth)\s+(?:des\s+|of\s+)?(?:exportations|exports)[^0-9%\-−+]{0,30}([-−+]?\d+(?:[.,]\d+)?)\s*%",
        ),
        LabelledPattern::new(
            "import_growth",
            "%",
            r"(?i)(?:[ée]volution|variation|croissance|growth)\s+(?:des\s+|of\s+)?(?:importations|imports)[^0-9%\-−+]{0,30}([-−+]?\d+(?:[.,]\d+)?)\s*%",
        ),
    ]
});

/// Foreign-trade figures from the exchange office's monthly indicators page.
pub struct CustomsAdapter {
    id: String,
    url: String,
    transport: Arc<dyn Transport>,
}

impl CustomsAdapter {
    pub fn new(id: impl Into<String>, url: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            url: url.unwrap_or(DEFAULT_URL).to_string(),
            transport,
        }
    }
}

#[async_trait]
impl SourceAdapter for CustomsAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let html = self.transport.get_text(&self.url, deadline).await?;
        let fields = extract_labelled(&self.id, &html, &PATTERNS, NumberLocale::French);
        finish(&self.id, fields, None)
    }
}
