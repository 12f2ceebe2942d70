//! Pipeline counters.
//!
//! Tracks what the agent has done across sessions (polls, accepted records,
//! drops, sink failures, exports) so the `status` command can report it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the running agent.
#[derive(Debug)]
pub struct PipelineStats {
    /// Successful `/session_data` polls
    polls_ok: AtomicU64,
    /// Failed polls (unreachable, non-2xx or malformed)
    polls_failed: AtomicU64,
    /// Records newly accepted into a session
    records_accepted: AtomicU64,
    /// Records dropped as duplicates
    duplicates_dropped: AtomicU64,
    /// Records the durable sink refused
    sink_failures: AtomicU64,
    /// CSV documents written
    exports: AtomicU64,
    /// When this process started counting
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            polls_ok: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
            records_accepted: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            exports: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats backed by a file, seeded from it when present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "Could not load previous pipeline stats");
        }

        stats
    }

    /// Record a successful poll and what it merged.
    pub fn record_poll(&self, accepted: usize, duplicates: usize) {
        self.polls_ok.fetch_add(1, Ordering::Relaxed);
        self.records_accepted
            .fetch_add(accepted as u64, Ordering::Relaxed);
        self.duplicates_dropped
            .fetch_add(duplicates as u64, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.polls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export(&self) {
        self.exports.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polls_ok: self.polls_ok.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            exports: self.exports.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Polls succeeded: {}\n\
             - Polls failed: {}\n\
             - Records accepted: {}\n\
             - Duplicates dropped: {}\n\
             - Sink failures: {}\n\
             - Exports written: {}\n\
             - Uptime: {} seconds",
            stats.polls_ok,
            stats.polls_failed,
            stats.records_accepted,
            stats.duplicates_dropped,
            stats.sink_failures,
            stats.exports,
            stats.uptime_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                polls_ok: stats.polls_ok,
                polls_failed: stats.polls_failed,
                records_accepted: stats.records_accepted,
                duplicates_dropped: stats.duplicates_dropped,
                sink_failures: stats.sink_failures,
                exports: stats.exports,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.polls_ok.store(persisted.polls_ok, Ordering::Relaxed);
                self.polls_failed
                    .store(persisted.polls_failed, Ordering::Relaxed);
                self.records_accepted
                    .store(persisted.records_accepted, Ordering::Relaxed);
                self.duplicates_dropped
                    .store(persisted.duplicates_dropped, Ordering::Relaxed);
                self.sink_failures
                    .store(persisted.sink_failures, Ordering::Relaxed);
                self.exports.store(persisted.exports, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub records_accepted: u64,
    pub duplicates_dropped: u64,
    pub sink_failures: u64,
    pub exports: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// On-disk form.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    polls_ok: u64,
    polls_failed: u64,
    records_accepted: u64,
    duplicates_dropped: u64,
    sink_failures: u64,
    exports: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedPipelineStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedPipelineStats {
    Arc::new(PipelineStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedPipelineStats {
    Arc::new(PipelineStats::with_persistence(path))
}
