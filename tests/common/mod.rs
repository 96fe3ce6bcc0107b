// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use macro_aggregator::{AdapterError, AggregatorConfig, Transport};
use tokio::time::Instant;

/// Serves fixture bodies by URL substring. Unknown URLs answer like a 404;
/// URLs matching a `hang` needle never answer.
#[derive(Default)]
pub struct FixtureTransport {
    pub routes: Vec<(&'static str, String)>,
    pub hang: Vec<&'static str>,
    pub delay: Duration,
    pub requests: AtomicUsize,
}

impl FixtureTransport {
    pub fn new(routes: Vec<(&'static str, String)>) -> Self {
        Self {
            routes,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get_text(&self, url: &str, deadline: Instant) -> Result<String, AdapterError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.hang.iter().any(|n| url.contains(n)) {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            if Instant::now() + self.delay > deadline {
                tokio::time::sleep_until(deadline).await;
                return Err(AdapterError::Timeout);
            }
            tokio::time::sleep(self.delay).await;
        }
        self.routes
            .iter()
            .find(|(needle, _)| url.contains(needle))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| AdapterError::unreachable(format!("HTTP 404 Not Found from {url}")))
    }
}

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("fixture {path}: {e}"))
}

/// One fixture per source, enough for every adapter to come back LIVE.
pub fn all_sources_transport() -> FixtureTransport {
    FixtureTransport::new(vec![
        ("NY.GDP.MKTP.KD.ZG", fixture("world_bank_gdp.json")),
        ("/LUR/MAR", fixture("imf_lur.json")),
        ("EXR/M.MAD.EUR", fixture("ecb_exr.xml")),
        ("/macro-economic", fixture("mef_macro.json")),
        ("finances.gov.ma/v1/sectors", fixture("mef_sectors.json")),
        ("finances.gov.ma/v1/regions", fixture("mef_regions.json")),
        ("/morocco/inflation-rate", fixture("te_inflation.html")),
        ("bkam.ma", fixture("bkam.html")),
        ("hcp.ma", fixture("hcp.html")),
        ("afdb.org", fixture("afdb.html")),
        ("oc.gov.ma", fixture("customs.html")),
    ])
}

/// Default registry with short, test-friendly timings.
pub fn fast_config() -> AggregatorConfig {
    AggregatorConfig {
        global_deadline_ms: 2_000,
        per_source_timeout_ms: 1_500,
        ..AggregatorConfig::default()
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
