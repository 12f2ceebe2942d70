//! Per-category totals for a session.

use crate::core::record::{DetectionRecord, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Totals by risk category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

/// Aggregate counts reported directly by the detection service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCounts {
    pub total_pedestrians: u64,
    pub high_risk: u64,
    pub medium_risk: u64,
    pub low_risk: u64,
}

impl ServerCounts {
    const FIELDS: [&'static str; 4] = ["totalPedestrians", "highRisk", "mediumRisk", "lowRisk"];

    /// Read counts from a `/session_data` body.
    ///
    /// Returns `None` when the body carries none of the count fields. Fields
    /// that are missing or not non-negative numbers count as 0; fractional
    /// counts are rounded to the nearest whole pedestrian.
    pub fn from_json(body: &Value) -> Option<Self> {
        let obj = body.as_object()?;
        if !Self::FIELDS.iter().any(|key| obj.contains_key(*key)) {
            return None;
        }

        let count = |key: &str| -> u64 {
            match obj.get(key) {
                Some(v) => v
                    .as_u64()
                    .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64))
                    .unwrap_or(0),
                None => 0,
            }
        };

        Some(Self {
            total_pedestrians: count("totalPedestrians"),
            high_risk: count("highRisk"),
            medium_risk: count("mediumRisk"),
            low_risk: count("lowRisk"),
        })
    }
}

impl From<ServerCounts> for SessionSummary {
    fn from(counts: ServerCounts) -> Self {
        Self {
            total: counts.total_pedestrians,
            high: counts.high_risk,
            medium: counts.medium_risk,
            low: counts.low_risk,
        }
    }
}

impl SessionSummary {
    /// Count for one category.
    pub fn count(&self, level: RiskLevel) -> u64 {
        match level {
            RiskLevel::High => self.high,
            RiskLevel::Medium => self.medium,
            RiskLevel::Low => self.low,
        }
    }

    /// Share of `level` in the total, in [0, 1] for consistent counts.
    pub fn share(&self, level: RiskLevel) -> f64 {
        self.count(level) as f64 / self.total.max(1) as f64
    }
}

/// Compute totals over a record set.
pub fn summarize<'a, I>(records: I) -> SessionSummary
where
    I: IntoIterator<Item = &'a DetectionRecord>,
{
    let mut summary = SessionSummary::default();
    for record in records {
        summary.total += 1;
        match record.risk_level {
            RiskLevel::High => summary.high += 1,
            RiskLevel::Medium => summary.medium += 1,
            RiskLevel::Low => summary.low += 1,
        }
    }
    summary
}

/// Totals as reported by the service, in the same shape as [`summarize`].
pub fn summarize_counts(counts: ServerCounts) -> SessionSummary {
    counts.into()
}
