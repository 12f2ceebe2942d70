//! Session identity and the per-session aggregate state.

use crate::core::history::{History, MergeReport};
use crate::core::record::normalize_at;
use crate::core::summary::{summarize, summarize_counts, ServerCounts, SessionSummary};
use crate::core::windowing::{TimeSeries, TimeSeriesSample};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Mint a session token: `session_<epoch ms>_<7 random chars>`.
pub fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", Utc::now().timestamp_millis(), &suffix[..7])
}

/// State owned by one detection run.
///
/// A session is superseded by the next start, never torn down in place:
/// records and series remain readable after stop. Whether it is still being
/// polled is the scheduler's state, not the session's.
#[derive(Debug, Clone)]
pub struct Session {
    session_id: String,
    started_at: DateTime<Utc>,
    history: History,
    series: TimeSeries,
    summary: SessionSummary,
    connection_error: bool,
}

impl Session {
    /// A fresh session with a newly minted id.
    pub fn begin() -> Self {
        Self::with_id(new_session_id())
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: Utc::now(),
            history: History::new(),
            series: TimeSeries::new(),
            summary: SessionSummary::default(),
            connection_error: false,
        }
    }

    /// Fold one successful poll into the session.
    ///
    /// Raw records are normalized and merged, the summary is refreshed (from
    /// the service's counts when present, else from the history) and one
    /// sample is appended to the series.
    pub fn apply_poll(
        &mut self,
        counts: Option<ServerCounts>,
        pedestrians: &[Value],
        captured_at: DateTime<Utc>,
    ) -> MergeReport {
        let incoming = pedestrians
            .iter()
            .map(|raw| normalize_at(raw, &self.session_id, captured_at));
        let report = self.history.merge(incoming);

        self.summary = match counts {
            Some(counts) => summarize_counts(counts),
            None => summarize(self.history.records()),
        };
        self.series
            .append(TimeSeriesSample::new(captured_at, &self.summary));
        self.connection_error = false;

        report
    }

    /// Record a failed poll. State is left untouched apart from the flag.
    pub fn mark_poll_failed(&mut self) {
        self.connection_error = true;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Totals recomputed from the accepted records.
    pub fn local_summary(&self) -> SessionSummary {
        summarize(self.history.records())
    }

    pub fn connection_error(&self) -> bool {
        self.connection_error
    }
}
