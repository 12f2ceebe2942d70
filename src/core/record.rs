//! Canonical detection records and the normalizer that produces them.
//!
//! The detection service hands us loosely shaped JSON. Every record passes
//! through [`normalize`] before anything else sees it, so the rest of the
//! pipeline only ever deals with fully populated [`DetectionRecord`]s.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Confidence assigned when the source omits it or sends a non-number.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Accepted timestamp layouts without an offset, read as UTC.
const NAIVE_DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a source timestamp.
///
/// Accepts RFC 3339, ISO 8601 date-times without an offset (as produced by
/// naive `isoformat()`), and plain dates. Offset-less values are UTC; a plain
/// date is its UTC midnight.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }

    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Risk classification of a single pedestrian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    /// Classify a raw `risk_level` field.
    ///
    /// Only the exact strings `"high"` and `"medium"` are recognised;
    /// anything else, including other spellings and non-strings, is `Low`.
    pub fn from_raw(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("high") => RiskLevel::High,
            Some("medium") => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed pedestrian event, as accepted into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Deduplication key, unique within a session
    pub id: String,
    /// Source timestamp, kept exactly as sent when [`parse_timestamp`] accepts it
    pub timestamp: String,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// Detector confidence, nominally in [0, 1]
    pub confidence: f64,
    /// Horizontal centre of the detection in frame pixels
    pub position_x: f64,
    /// Vertical centre of the detection in frame pixels
    pub position_y: f64,
    /// Owning session; always assigned locally, never taken from the source
    pub session_id: String,
}

impl DetectionRecord {
    /// Parsed form of [`DetectionRecord::timestamp`].
    ///
    /// Normalized records always carry a valid timestamp; a record built by
    /// hand with garbage falls back to the Unix epoch so ordering stays total.
    pub fn observed_at(&self) -> DateTime<Utc> {
        parse_timestamp(&self.timestamp).unwrap_or_default()
    }
}

/// Normalize a raw detection object, stamping it with `session_id`.
///
/// Never fails. Missing or invalid fields are repaired with defaults.
pub fn normalize(raw: &Value, session_id: &str) -> DetectionRecord {
    normalize_at(raw, session_id, Utc::now())
}

/// Same as [`normalize`] with an explicit capture time, used as the
/// replacement timestamp and for generated ids.
pub fn normalize_at(raw: &Value, session_id: &str, captured_at: DateTime<Utc>) -> DetectionRecord {
    let field = |key: &str| raw.as_object().and_then(|m| m.get(key));

    let id = field("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| generated_id(captured_at));

    let timestamp = field("timestamp")
        .and_then(Value::as_str)
        .filter(|s| parse_timestamp(s).is_some())
        .map(str::to_string)
        .unwrap_or_else(|| captured_at.to_rfc3339_opts(SecondsFormat::Millis, true));

    DetectionRecord {
        id,
        timestamp,
        risk_level: RiskLevel::from_raw(field("risk_level")),
        confidence: number_or(field("confidence"), DEFAULT_CONFIDENCE),
        position_x: number_or(field("position_x"), 0.0),
        position_y: number_or(field("position_y"), 0.0),
        session_id: session_id.to_string(),
    }
}

fn number_or(value: Option<&Value>, default: f64) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(default)
}

/// Id for a record that arrived without one: `ped_<epoch ms>_<7 chars>`.
fn generated_id(captured_at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("ped_{}_{}", captured_at.timestamp_millis(), &suffix[..7])
}
