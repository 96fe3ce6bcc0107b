// src/ingest/config.rs
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Reading;

pub const DEFAULT_CONFIG_PATH_TOML: &str = "config/aggregator.toml";
pub const DEFAULT_CONFIG_PATH_JSON: &str = "config/aggregator.json";

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const ENV_GLOBAL_DEADLINE_MS: &str = "AGGREGATOR_GLOBAL_DEADLINE_MS";
pub const ENV_WORKER_POOL_SIZE: &str = "AGGREGATOR_WORKER_POOL_SIZE";
pub const ENV_DB_PATH: &str = "AGGREGATOR_DB_PATH";

/// Adapters never retry more than this, whatever the config says.
pub const MAX_ATTEMPTS_CAP: u32 = 3;

/// Which adapter implementation serves a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WorldBank,
    Imf,
    Ecb,
    Mef,
    TradingEconomics,
    BankAlMaghrib,
    Hcp,
    Afdb,
    Customs,
}

impl SourceKind {
    pub const ALL: [SourceKind; 9] = [
        SourceKind::WorldBank,
        SourceKind::Imf,
        SourceKind::Ecb,
        SourceKind::Mef,
        SourceKind::TradingEconomics,
        SourceKind::BankAlMaghrib,
        SourceKind::Hcp,
        SourceKind::Afdb,
        SourceKind::Customs,
    ];

    /// Default source id for the built-in registry.
    pub fn default_id(&self) -> &'static str {
        match self {
            SourceKind::WorldBank => "world_bank",
            SourceKind::Imf => "imf",
            SourceKind::Ecb => "ecb",
            SourceKind::Mef => "mef",
            SourceKind::TradingEconomics => "trading_economics",
            SourceKind::BankAlMaghrib => "bank_al_maghrib",
            SourceKind::Hcp => "hcp",
            SourceKind::Afdb => "afdb",
            SourceKind::Customs => "customs",
        }
    }
}

/// One entry of the source registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    /// Overrides the adapter's built-in endpoint (useful for mirrors and tests).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fallback readings merged over the kind's built-in estimates.
    #[serde(default)]
    pub fallback: BTreeMap<String, Reading>,
}

impl SourceConfig {
    pub fn builtin(kind: SourceKind) -> Self {
        Self {
            id: kind.default_id().to_string(),
            kind,
            base_url: None,
            enabled: true,
            fallback: BTreeMap::new(),
        }
    }
}

/// Static configuration, loaded once at startup and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// ISO 3166-1 alpha-3 country code.
    #[serde(default = "default_country")]
    pub country: String,
    /// Country slug for sources that address pages by name.
    #[serde(default = "default_country_name")]
    pub country_name: String,
    /// ISO 4217 code of the local currency.
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_global_deadline_ms")]
    pub global_deadline_ms: u64,
    #[serde(default = "default_per_source_timeout_ms")]
    pub per_source_timeout_ms: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Drop observations further than this factor from the median. Absent = keep all.
    #[serde(default)]
    pub outlier_max_ratio: Option<f64>,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    /// source_id -> field -> canonical indicator, merged over the built-in table.
    #[serde(default)]
    pub mapping: BTreeMap<String, BTreeMap<String, String>>,
}

fn default_true() -> bool {
    true
}
fn default_country() -> String {
    "MAR".to_string()
}
fn default_country_name() -> String {
    "morocco".to_string()
}
fn default_currency() -> String {
    "MAD".to_string()
}
fn default_global_deadline_ms() -> u64 {
    20_000
}
fn default_per_source_timeout_ms() -> u64 {
    15_000
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    "macro-aggregator/0.1 (+statistical data collector)".to_string()
}
fn default_database_path() -> PathBuf {
    PathBuf::from("data/indicators.db")
}
fn default_sources() -> Vec<SourceConfig> {
    SourceKind::ALL.iter().map(|k| SourceConfig::builtin(*k)).collect()
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            country: default_country(),
            country_name: default_country_name(),
            currency: default_currency(),
            global_deadline_ms: default_global_deadline_ms(),
            per_source_timeout_ms: default_per_source_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            user_agent: default_user_agent(),
            database_path: default_database_path(),
            outlier_max_ratio: None,
            sources: default_sources(),
            mapping: BTreeMap::new(),
        }
    }
}

impl AggregatorConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $AGGREGATOR_CONFIG_PATH
    /// 2) config/aggregator.toml
    /// 3) config/aggregator.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("AGGREGATOR_CONFIG_PATH points to non-existent path"));
            }
        }
        for candidate in [DEFAULT_CONFIG_PATH_TOML, DEFAULT_CONFIG_PATH_JSON] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(ms) = parse_env::<u64>(ENV_GLOBAL_DEADLINE_MS) {
            self.global_deadline_ms = ms;
        }
        if let Some(n) = parse_env::<usize>(ENV_WORKER_POOL_SIZE) {
            self.worker_pool_size = n;
        }
        if let Ok(p) = std::env::var(ENV_DB_PATH) {
            if !p.trim().is_empty() {
                self.database_path = PathBuf::from(p.trim());
            }
        }
    }

    /// Structural checks. An empty registry is not rejected here; the
    /// coordinator reports it when a cycle is attempted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self.global_deadline_ms == 0 {
            return Err(ConfigError::ZeroDuration("global_deadline_ms"));
        }
        if self.per_source_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("per_source_timeout_ms"));
        }
        if let Some(r) = self.outlier_max_ratio {
            if !r.is_finite() || r <= 1.0 {
                return Err(ConfigError::InvalidOutlierRatio(r));
            }
        }
        let mut seen = HashSet::new();
        for s in &self.sources {
            if !seen.insert(s.id.as_str()) {
                return Err(ConfigError::DuplicateSource(s.id.clone()));
            }
        }
        Ok(())
    }

    /// Registered sources in registration order.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.global_deadline_ms)
    }

    pub fn per_source_timeout(&self) -> Duration {
        Duration::from_millis(self.per_source_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS_CAP)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AggregatorConfig> {
    match hint_ext {
        "toml" => return parse_toml(s),
        "json" => return parse_json(s),
        _ => {}
    }
    // No usable extension: sniff.
    if s.trim_start().starts_with('{') {
        if let Ok(v) = parse_json(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_toml(s) {
        return Ok(v);
    }
    Err(ConfigError::UnsupportedFormat(hint_ext.to_string()).into())
}

fn parse_toml(s: &str) -> Result<AggregatorConfig> {
    toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
}

fn parse_json(s: &str) -> Result<AggregatorConfig> {
    serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
}
