//! Consolidator: one value per canonical indicator.
//!
//! Observations are grouped by indicator name and averaged. LIVE and
//! FALLBACK observations count alike; provenance is kept on each
//! indicator and on the snapshot instead.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::ingest::config::AggregatorConfig;
use crate::ingest::coordinator::Acquired;
use crate::model::{
    AggregationSnapshot, CanonicalObservation, ConsolidatedIndicator, ObservationRecord,
    SourceProvenance,
};

/// Disagreement handling between sources. Disabled unless configured.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutlierPolicy {
    #[default]
    Disabled,
    /// Drop observations more than this factor away from the median.
    /// Applies to indicators with at least three observations and never
    /// empties an indicator.
    MaxRatio(f64),
}

impl OutlierPolicy {
    pub fn from_config(cfg: &AggregatorConfig) -> Self {
        match cfg.outlier_max_ratio {
            Some(r) => OutlierPolicy::MaxRatio(r),
            None => OutlierPolicy::Disabled,
        }
    }

    fn apply(&self, obs: Vec<CanonicalObservation>) -> Vec<CanonicalObservation> {
        let OutlierPolicy::MaxRatio(max_ratio) = *self else {
            return obs;
        };
        if obs.len() < 3 {
            return obs;
        }
        let m = median(obs.iter().map(|o| o.value));
        let (kept, dropped): (Vec<_>, Vec<_>) = obs
            .iter()
            .cloned()
            .partition(|o| divergence(o.value, m) <= max_ratio);
        if kept.is_empty() {
            return obs;
        }
        for o in &dropped {
            tracing::info!(
                indicator = %o.indicator,
                source = %o.source_id,
                value = o.value,
                median = m,
                "outlier observation dropped"
            );
        }
        kept
    }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    }
}

/// Multiplicative distance between two values; opposite signs or a zero
/// against a non-zero are infinitely apart.
fn divergence(v: f64, reference: f64) -> f64 {
    if v == reference {
        return 1.0;
    }
    if v == 0.0 || reference == 0.0 || v.signum() != reference.signum() {
        return f64::INFINITY;
    }
    let (a, b) = (v.abs(), reference.abs());
    a.max(b) / a.min(b)
}

/// Hex SHA-256 over the serialized indicators map.
pub fn fingerprint(indicators: &BTreeMap<String, ConsolidatedIndicator>) -> String {
    let bytes = serde_json::to_vec(indicators).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct Consolidator {
    policy: OutlierPolicy,
}

impl Consolidator {
    pub fn new(policy: OutlierPolicy) -> Self {
        Self { policy }
    }

    /// Group and average. `registry` fixes the order of contributing
    /// sources; indicators without observations do not appear.
    pub fn consolidate(
        &self,
        registry: &[&str],
        observations: Vec<CanonicalObservation>,
    ) -> BTreeMap<String, ConsolidatedIndicator> {
        let rank: HashMap<&str, usize> = registry
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut grouped: BTreeMap<String, Vec<CanonicalObservation>> = BTreeMap::new();
        for o in observations {
            grouped.entry(o.indicator.clone()).or_default().push(o);
        }

        let mut out = BTreeMap::new();
        for (indicator, mut obs) in grouped {
            // Unregistered ids sort last, by id.
            obs.sort_by(|a, b| {
                let ra = rank.get(a.source_id.as_str()).copied().unwrap_or(usize::MAX);
                let rb = rank.get(b.source_id.as_str()).copied().unwrap_or(usize::MAX);
                ra.cmp(&rb).then_with(|| a.source_id.cmp(&b.source_id))
            });
            let obs = self.policy.apply(obs);
            if obs.is_empty() {
                continue;
            }

            let sum: f64 = obs.iter().map(|o| o.value).sum();
            let mut contributing: Vec<String> = Vec::with_capacity(obs.len());
            for o in &obs {
                if !contributing.contains(&o.source_id) {
                    contributing.push(o.source_id.clone());
                }
            }
            let consolidated = ConsolidatedIndicator {
                value: sum / obs.len() as f64,
                unit: obs.iter().find_map(|o| o.unit.clone()),
                contributing_sources: contributing,
                sample_count: obs.len(),
                observations: obs
                    .into_iter()
                    .map(|o| ObservationRecord {
                        source_id: o.source_id,
                        value: o.value,
                        unit: o.unit,
                        period: o.period,
                        origin: o.origin,
                    })
                    .collect(),
            };
            out.insert(indicator, consolidated);
        }
        out
    }

    /// Build the immutable snapshot for one cycle. `acquired` is in
    /// registration order, one entry per registered source.
    pub fn snapshot(
        &self,
        acquired: &[Acquired],
        observations: Vec<CanonicalObservation>,
        timestamp: DateTime<Utc>,
    ) -> AggregationSnapshot {
        let registry: Vec<&str> = acquired
            .iter()
            .map(|a| a.result.source_id.as_str())
            .collect();
        let indicators = self.consolidate(&registry, observations);

        let sources_used = registry
            .iter()
            .filter(|id| {
                indicators
                    .values()
                    .any(|i| i.contributing_sources.iter().any(|s| s == *id))
            })
            .map(|id| id.to_string())
            .collect();

        let provenance = acquired
            .iter()
            .map(|a| SourceProvenance {
                source_id: a.result.source_id.clone(),
                origin: a.result.origin,
                fetched_at: a.result.fetched_at,
                error: a.error.as_ref().map(|e| e.to_string()),
            })
            .collect();

        let fingerprint = fingerprint(&indicators);
        AggregationSnapshot {
            timestamp,
            indicators,
            sources_used,
            provenance,
            fingerprint,
        }
    }
}
