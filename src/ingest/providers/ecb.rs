// src/ingest/providers/ecb.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::time::Instant;

use super::finish;
use crate::error::AdapterError;
use crate::ingest::types::{SourceAdapter, Transport};
use crate::model::{Reading, SourceResult};

pub const DEFAULT_BASE_URL: &str = "https://data-api.ecb.europa.eu/service/data";

pub struct EcbAdapter {
    id: String,
    base: String,
    currency: String,
    transport: Arc<dyn Transport>,
}

impl EcbAdapter {
    pub fn new(
        id: impl Into<String>,
        base: Option<&str>,
        currency: &str,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id: id.into(),
            base: base.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            currency: currency.to_ascii_uppercase(),
            transport,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/EXR/M.{}.EUR.SP00.A?lastNObservations=3&detail=dataonly",
            self.base, self.currency
        )
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Latest (period, value) from an SDMX-ML payload.
///
/// Understands the generic layout (`ObsDimension`/`ObsValue` children) and
/// the structure-specific one (`Obs TIME_PERIOD=.. OBS_VALUE=..`).
pub(crate) fn parse_latest_observation(xml: &str) -> Result<(String, f64), AdapterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut period: Option<String> = None;
    let mut latest: Option<(String, f64)> = None;

    let mut keep = |p: Option<String>, v: Option<String>| {
        let (Some(p), Some(v)) = (p, v) else { return };
        let Ok(v) = v.trim().parse::<f64>() else { return };
        if !v.is_finite() {
            return;
        }
        if latest.as_ref().map_or(true, |(lp, _)| p > *lp) {
            latest = Some((p, v));
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"ObsDimension" => period = attr(&e, b"value"),
                b"ObsValue" => keep(period.take(), attr(&e, b"value")),
                b"Obs" => keep(attr(&e, b"TIME_PERIOD"), attr(&e, b"OBS_VALUE")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(AdapterError::malformed(format!(
                    "ecb xml at {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    latest.ok_or_else(|| AdapterError::malformed("ecb payload has no observations"))
}

#[async_trait]
impl SourceAdapter for EcbAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, deadline: Instant) -> Result<SourceResult, AdapterError> {
        let body = self.transport.get_text(&self.url(), deadline).await?;
        let (period, value) = parse_latest_observation(&body)?;
        let mut fields = BTreeMap::new();
        fields.insert(
            "exchange_rate_eur".to_string(),
            Reading::number(value)
                .with_unit(format!("{} per EUR", self.currency))
                .with_period(period),
        );
        finish(&self.id, fields, None)
    }
}
