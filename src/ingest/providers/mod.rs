// src/ingest/providers/mod.rs
pub mod afdb;
pub mod bank_al_maghrib;
pub mod customs;
pub mod ecb;
pub mod hcp;
pub mod imf;
pub mod mef;
pub mod trading_economics;
pub mod world_bank;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use regex::Regex;
use tokio::time::{timeout_at, Instant};

use crate::error::AdapterError;
use crate::ingest::config::{AggregatorConfig, SourceConfig, SourceKind};
use crate::ingest::types::{SourceAdapter, Transport};
use crate::ingest::{normalize_text, parse_number_in, NumberLocale};
use crate::model::{Reading, SourceResult};

/// Build the adapter serving one registry entry.
pub fn build_adapter(
    source: &SourceConfig,
    cfg: &AggregatorConfig,
    transport: Arc<dyn Transport>,
) -> Arc<dyn SourceAdapter> {
    let id = source.id.clone();
    let base = source.base_url.as_deref();
    match source.kind {
        SourceKind::WorldBank => Arc::new(world_bank::WorldBankAdapter::new(
            id,
            base,
            &cfg.country,
            transport,
        )),
        SourceKind::Imf => Arc::new(imf::ImfAdapter::new(id, base, &cfg.country, transport)),
        SourceKind::Ecb => Arc::new(ecb::EcbAdapter::new(id, base, &cfg.currency, transport)),
        SourceKind::Mef => Arc::new(mef::MefAdapter::new(id, base, transport)),
        SourceKind::TradingEconomics => Arc::new(
            trading_economics::TradingEconomicsAdapter::new(id, base, &cfg.country_name, transport),
        ),
        SourceKind::BankAlMaghrib => Arc::new(bank_al_maghrib::BankAlMaghribAdapter::new(
            id, base, transport,
        )),
        SourceKind::Hcp => Arc::new(hcp::HcpAdapter::new(id, base, transport)),
        SourceKind::Afdb => Arc::new(afdb::AfdbAdapter::new(id, base, transport)),
        SourceKind::Customs => Arc::new(customs::CustomsAdapter::new(id, base, transport)),
    }
}

/// Issue every request at once, each cut off at `deadline`.
///
/// One hanging request costs only its own answer; the others are returned
/// in request order.
pub(crate) async fn fetch_all<K>(
    transport: &dyn Transport,
    requests: Vec<(K, String)>,
    deadline: Instant,
) -> Vec<(K, Result<String, AdapterError>)> {
    let calls = requests.into_iter().map(|(key, url)| async move {
        let body = match timeout_at(deadline, transport.get_text(&url, deadline)).await {
            Ok(res) => res,
            Err(_) => Err(AdapterError::Timeout),
        };
        (key, body)
    });
    join_all(calls).await
}

/// Partial success is success: return whatever was extracted, and fail
/// only when nothing was, with the last error seen.
pub(crate) fn finish(
    source_id: &str,
    fields: BTreeMap<String, Reading>,
    last_err: Option<AdapterError>,
) -> Result<SourceResult, AdapterError> {
    if fields.is_empty() {
        return Err(last_err.unwrap_or_else(|| AdapterError::malformed("no fields extracted")));
    }
    if let Some(e) = last_err {
        tracing::debug!(source = source_id, error = %e, "partial result");
    }
    Ok(SourceResult::live(source_id, fields))
}

/// A regex over page text whose first capture group is the value.
pub(crate) struct LabelledPattern {
    pub field: &'static str,
    pub unit: &'static str,
    pub re: Regex,
}

impl LabelledPattern {
    pub fn new(field: &'static str, unit: &'static str, pattern: &str) -> Self {
        Self {
            field,
            unit,
            re: Regex::new(pattern).expect("static pattern"),
        }
    }
}

/// Apply labelled patterns to an HTML page; a miss just leaves the field out.
pub(crate) fn extract_labelled(
    source_id: &str,
    html: &str,
    patterns: &[LabelledPattern],
    locale: NumberLocale,
) -> BTreeMap<String, Reading> {
    let text = normalize_text(html);
    let mut out = BTreeMap::new();
    for p in patterns {
        let value = p
            .re
            .captures(&text)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_number_in(m.as_str(), locale));
        match value {
            Some(v) => {
                out.insert(p.field.to_string(), Reading::number(v).with_unit(p.unit));
            }
            None => tracing::debug!(source = source_id, field = p.field, "pattern miss"),
        }
    }
    out
}
