//! Core aggregation pipeline for the StreetSense agent.
//!
//! This module contains:
//! - Record normalization at the network boundary
//! - History reconciliation (deduplicated, first-write-wins)
//! - Summary totals and the bounded time-series
//! - Session state and CSV export

pub mod export;
pub mod history;
pub mod record;
pub mod session;
pub mod summary;
pub mod windowing;

// Re-export commonly used types
pub use export::{export_csv, CsvDocument, ExportError, CSV_HEADER};
pub use history::{merge, History, MergeReport, DISPLAY_LIMIT};
pub use record::{normalize, normalize_at, parse_timestamp, DetectionRecord, RiskLevel, DEFAULT_CONFIDENCE};
pub use session::{new_session_id, Session};
pub use summary::{summarize, summarize_counts, ServerCounts, SessionSummary};
pub use windowing::{TimeSeries, TimeSeriesSample, MIN_SCALE, SERIES_CAPACITY};
