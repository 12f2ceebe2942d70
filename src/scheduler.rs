//! Poll scheduler: session lifecycle and the polling cadence.
//!
//! [`PollScheduler`] is an explicit state machine
//! (`Idle -> Starting -> Active -> Stopping -> Idle`) that owns the current
//! [`Session`]. [`spawn`] runs it on a single task that serializes user
//! commands against poll ticks, so a tick's merge is never observed half-done
//! and a stop cancels the pending tick before anything else runs.

use crate::core::{export_csv, CsvDocument, DetectionRecord, ExportError, Session, SessionSummary};
use crate::core::{TimeSeriesSample, DISPLAY_LIMIT};
use crate::gateway::{DetectionGateway, GatewayError};
use crate::sink::{SharedSink, SinkWorker};
use crate::stats::{create_shared_stats, SharedPipelineStats};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Starting => "starting",
            SchedulerState::Active => "active",
            SchedulerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Errors a user-initiated transition can report.
///
/// Transient poll failures are not errors here; they only raise
/// [`SessionView::connection_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The service refused or could not be reached on start
    StartFailed(GatewayError),
    /// The stop signal failed; polling was halted anyway
    StopFailed(GatewayError),
    /// The scheduler task is gone
    Closed,
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::StartFailed(e) => write!(f, "Could not start detection: {e}"),
            SchedulerError::StopFailed(e) => write!(f, "Could not stop detection cleanly: {e}"),
            SchedulerError::Closed => write!(f, "Scheduler is no longer running"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Poll succeeded and was folded into the session
    Polled { accepted: usize, duplicates: usize },
    /// Poll failed; state kept, connection error raised
    Failed,
    /// Not active, nothing done
    Skipped,
}

/// Read-only copy of what a UI needs to render.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub state: SchedulerState,
    pub session_id: Option<String>,
    pub summary: SessionSummary,
    pub series: Vec<TimeSeriesSample>,
    pub max_value: u64,
    pub record_count: usize,
    pub connection_error: bool,
}

/// The scheduler state machine.
pub struct PollScheduler {
    gateway: Arc<dyn DetectionGateway>,
    sink: Option<SharedSink>,
    sink_worker: Option<SinkWorker>,
    stats: SharedPipelineStats,
    interval: Duration,
    state: SchedulerState,
    session: Option<Session>,
}

impl PollScheduler {
    pub fn new(gateway: Arc<dyn DetectionGateway>) -> Self {
        Self {
            gateway,
            sink: None,
            sink_worker: None,
            stats: create_shared_stats(),
            interval: DEFAULT_POLL_INTERVAL,
            state: SchedulerState::Idle,
            session: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Offer newly accepted records to `sink`. Writes run on a separate
    /// task started with the first record.
    pub fn with_sink(mut self, sink: Option<SharedSink>) -> Self {
        self.sink = sink;
        self.sink_worker = None;
        self
    }

    pub fn with_stats(mut self, stats: SharedPipelineStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SchedulerState::Active
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current (or most recent) session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> &SharedPipelineStats {
        &self.stats
    }

    /// Begin a new detection session.
    ///
    /// A no-op unless idle. On success a new session id is minted and the
    /// previous session's records and series are discarded; on failure the
    /// previous session is left as it was.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.state != SchedulerState::Idle {
            debug!(state = %self.state, "Start ignored, scheduler not idle");
            return Ok(());
        }

        self.state = SchedulerState::Starting;
        match self.gateway.start().await {
            Ok(()) => {
                let session = Session::begin();
                info!(session_id = session.session_id(), "Detection session started");
                self.session = Some(session);
                self.state = SchedulerState::Active;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Detection service refused start");
                self.state = SchedulerState::Idle;
                Err(SchedulerError::StartFailed(e))
            }
        }
    }

    /// End the active session.
    ///
    /// Polling stops regardless of whether the service acknowledges the stop.
    /// Records and series stay available until the next start.
    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        if self.state != SchedulerState::Active {
            debug!(state = %self.state, "Stop ignored, scheduler not active");
            return Ok(());
        }

        self.state = SchedulerState::Stopping;
        let result = self.gateway.stop().await;
        self.state = SchedulerState::Idle;

        let session_id = self.session.as_ref().map(|s| s.session_id().to_string());
        match result {
            Ok(()) => {
                info!(session_id = ?session_id, "Detection session stopped");
                Ok(())
            }
            Err(e) => {
                warn!(session_id = ?session_id, error = %e, "Stop signal failed, polling halted anyway");
                Err(SchedulerError::StopFailed(e))
            }
        }
    }

    /// Run one poll cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.state != SchedulerState::Active {
            return TickOutcome::Skipped;
        }

        let polled = self.gateway.poll().await;

        let Some(session) = self.session.as_mut() else {
            return TickOutcome::Skipped;
        };

        let payload = match polled {
            Ok(payload) => payload,
            Err(e) => {
                warn!(session_id = session.session_id(), error = %e, "Poll failed, retrying next tick");
                session.mark_poll_failed();
                self.stats.record_poll_failure();
                return TickOutcome::Failed;
            }
        };

        let report = session.apply_poll(payload.counts, &payload.pedestrians, Utc::now());
        debug!(
            session_id = session.session_id(),
            accepted = report.accepted.len(),
            duplicates = report.duplicates,
            "Poll merged"
        );
        self.stats
            .record_poll(report.accepted.len(), report.duplicates);

        let outcome = TickOutcome::Polled {
            accepted: report.accepted.len(),
            duplicates: report.duplicates,
        };
        if !report.accepted.is_empty() {
            if let Some(worker) = self.sink_worker() {
                for record in report.accepted {
                    worker.offer(record);
                }
            }
        }
        outcome
    }

    fn sink_worker(&mut self) -> Option<&SinkWorker> {
        if self.sink_worker.is_none() {
            let sink = self.sink.clone()?;
            self.sink_worker = Some(SinkWorker::spawn(sink, self.stats.clone()));
        }
        self.sink_worker.as_ref()
    }

    /// Wait until the sink has handled every record offered so far.
    pub async fn flush_sink(&self) {
        if let Some(worker) = &self.sink_worker {
            worker.flush().await;
        }
    }

    /// Drain pending sink writes and end the sink task.
    pub async fn close_sink(&mut self) {
        if let Some(worker) = self.sink_worker.take() {
            worker.close().await;
        }
    }

    pub fn view(&self) -> SessionView {
        match &self.session {
            Some(session) => SessionView {
                state: self.state,
                session_id: Some(session.session_id().to_string()),
                summary: session.summary(),
                series: session.series().to_vec(),
                max_value: session.series().max_value(),
                record_count: session.history().len(),
                connection_error: session.connection_error(),
            },
            None => SessionView {
                state: self.state,
                session_id: None,
                summary: SessionSummary::default(),
                series: Vec::new(),
                max_value: crate::core::MIN_SCALE,
                record_count: 0,
                connection_error: false,
            },
        }
    }

    /// Most recent records in display order.
    pub fn recent(&self, limit: usize) -> Vec<DetectionRecord> {
        self.session
            .as_ref()
            .map(|s| s.history().recent(limit).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Render the session's history as CSV.
    pub fn export(&self) -> Result<CsvDocument, ExportError> {
        let session = self.session.as_ref().ok_or(ExportError::Empty)?;
        let document = export_csv(session.history(), session.session_id())?;
        self.stats.record_export();
        Ok(document)
    }
}

enum Command {
    Start(oneshot::Sender<Result<(), SchedulerError>>),
    Stop(oneshot::Sender<Result<(), SchedulerError>>),
    View(oneshot::Sender<SessionView>),
    Recent(usize, oneshot::Sender<Vec<DetectionRecord>>),
    Export(oneshot::Sender<Result<CsvDocument, ExportError>>),
}

/// Handle to a scheduler running on its own task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SchedulerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SchedulerError::Closed)?;
        reply_rx.await.map_err(|_| SchedulerError::Closed)
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.request(Command::Start).await?
    }

    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.request(Command::Stop).await?
    }

    pub async fn view(&self) -> Result<SessionView, SchedulerError> {
        self.request(Command::View).await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<DetectionRecord>, SchedulerError> {
        self.request(|reply| Command::Recent(limit, reply)).await
    }

    /// Recent records using the on-screen table size.
    pub async fn recent_for_display(&self) -> Result<Vec<DetectionRecord>, SchedulerError> {
        self.recent(DISPLAY_LIMIT).await
    }

    /// Outer error: the scheduler is gone. Inner error: nothing to export.
    pub async fn export(&self) -> Result<Result<CsvDocument, ExportError>, SchedulerError> {
        self.request(Command::Export).await
    }
}

/// Run `scheduler` on a new task.
///
/// The task ends when every [`SchedulerHandle`] is dropped; an active session
/// is stopped first. The join handle yields the scheduler back so its final
/// session can still be inspected or exported, and pending sink writes can be
/// drained with [`PollScheduler::close_sink`].
pub fn spawn(scheduler: PollScheduler) -> (SchedulerHandle, JoinHandle<PollScheduler>) {
    let (tx, rx) = mpsc::channel(32);
    let task = tokio::spawn(drive(scheduler, rx));
    (SchedulerHandle { tx }, task)
}

async fn drive(mut scheduler: PollScheduler, mut rx: mpsc::Receiver<Command>) -> PollScheduler {
    // Next poll is due at this instant. Commands do not push it back.
    let mut next_tick = Instant::now();

    loop {
        let command = if scheduler.is_active() {
            tokio::select! {
                biased;
                command = rx.recv() => command,
                _ = tokio::time::sleep_until(next_tick) => {
                    scheduler.tick().await;
                    // Measured from completion so slow polls never overlap.
                    next_tick = Instant::now() + scheduler.interval();
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        let Some(command) = command else {
            break;
        };

        match command {
            Command::Start(reply) => {
                let was_idle = scheduler.state() == SchedulerState::Idle;
                let result = scheduler.start().await;
                if was_idle && scheduler.is_active() {
                    next_tick = Instant::now();
                }
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let _ = reply.send(scheduler.stop().await);
            }
            Command::View(reply) => {
                let _ = reply.send(scheduler.view());
            }
            Command::Recent(limit, reply) => {
                let _ = reply.send(scheduler.recent(limit));
            }
            Command::Export(reply) => {
                let _ = reply.send(scheduler.export());
            }
        }
    }

    if let Err(e) = scheduler.stop().await {
        warn!(error = %e, "Stop on shutdown failed");
    }
    scheduler
}
