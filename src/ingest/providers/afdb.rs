// src/ingest/providers/afdb.rs
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::time::Instant;

use super::{extract_labelled, finish, LabelledPattern};
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::ingest::NumberLocale;
use crate::model::SourceResult;

pub const DEFAULT_URL: &str = "https://www.afdb.org/en/countries/north-africa/morocco";

static PATTERNS: Lazy<Vec<LabelledPattern>> = Lazy::new(|| {
    vec![
        LabelledPattern::new(
            "gdp_growth",
            "%",
            r"(?i)gdp[^%]{0,20}growth[^0-9%\-]{0,40}(-?\d+(?:[.,]\d+)?)\s*%",
        ),
        LabelledPattern::new(
            "unemployment",
            "%",
            r"(?i)unemployment[^0-9%\-]{0,40}(-?\d+(?:[.,]\d+)?)\s*%",
        ),
        LabelledPattern::new(
            "poverty",
            "%",
            r"(?i)poverty[^0-9%\-]{0,60}(\d+(?:[.,]\d+)?)\s*%",
        ),
    ]
});

pub struct AfdbAdapter {
    id: String,
    url: String,
    transport: Arc<dyn Transport>,
}

impl AfdbAdapter {
    pub fn new(id: impl Into<String>, url: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            url: url.unwrap_or(DEFAULT_URL).to_string(),
            transport,
        }
    }
}

#[async_trait]
impl SourceAdapter for AfdbAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let html = self.transport.get_text(&self.url, deadline).await?;
        let fields = extract_labelled(&self.id, &html, &PATTERNS, NumberLocale::Auto);
        finish(&self.id, fields, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::providers::testing::{far_deadline, FixtureTransport};
    use crate::model::RawValue;

    #[tokio::test]
    async fn extracts_outlook_figures() {
        let page = r#"<div class="stat-block"><p>Real GDP growth is estimated at 3.2% in 2024.</p>
            <p>Unemployment stood at 13.7 % while the poverty rate (national line) was 4.8%.</p></div>"#;
        let transport = Arc::new(FixtureTransport {
            routes: vec![("afdb.test", page.to_string())],
        });
        let a = AfdbAdapter::new("afdb", Some("http://afdb.test/morocco"), transport);
        let r = a.fetch(far_deadline()).await.unwrap();
        assert_eq!(r.fields["gdp_growth"].value, RawValue::Number(3.2));
        assert_eq!(r.fields["unemployment"].value, RawValue::Number(13.7));
        assert_eq!(r.fields["poverty"].value, RawValue::Number(4.8));
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let transport = Arc::new(FixtureTransport { routes: vec![] });
        let a = AfdbAdapter::new("afdb", None, transport);
        assert_eq!(a.fetch(far_deadline()).await.unwrap_err().kind(), "unreachable");
    }
}
