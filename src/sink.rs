//! Optional durable sinks for accepted detection records.
//!
//! Every record newly accepted into a session is offered to the configured
//! sink. Writes happen on a [`SinkWorker`] task fed through a bounded queue,
//! so a slow or broken store never holds up polling, reads or stop. Sinks are
//! best-effort: failures are logged and counted, never retried.

use crate::config::SinkConfig;
use crate::core::DetectionRecord;
use crate::stats::SharedPipelineStats;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Records that may wait for the sink before new ones are dropped.
pub const SINK_QUEUE_CAPACITY: usize = 1024;

/// Sink error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    Io(String),
    Network(String),
    Server { status: u16, message: String },
    Serialization(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "Sink IO error: {e}"),
            SinkError::Network(e) => write!(f, "Sink network error: {e}"),
            SinkError::Server { status, message } => {
                write!(f, "Sink server error ({status}): {message}")
            }
            SinkError::Serialization(e) => write!(f, "Sink serialization error: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// An external store that accepts records keyed by id.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Insert one record.
    async fn store(&self, record: &DetectionRecord) -> Result<(), SinkError>;
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn RecordSink>;

/// Build the sink described by `config`, if any.
pub fn build_sink(config: &SinkConfig) -> Result<Option<SharedSink>, SinkError> {
    match config {
        SinkConfig::None => Ok(None),
        SinkConfig::Jsonl { path } => Ok(Some(Arc::new(JsonlSink::new(path.clone())))),
        #[cfg(feature = "gateway")]
        SinkConfig::Rest { url, token, table } => Ok(Some(Arc::new(RestSink::new(
            url,
            token.clone(),
            table,
        )?))),
        #[cfg(not(feature = "gateway"))]
        SinkConfig::Rest { .. } => Err(SinkError::Network(
            "REST sink requires the gateway feature".to_string(),
        )),
    }
}

enum SinkJob {
    Store(DetectionRecord),
    Flush(oneshot::Sender<()>),
}

/// Background task that owns the writes to one sink.
pub struct SinkWorker {
    name: String,
    tx: mpsc::Sender<SinkJob>,
    stats: SharedPipelineStats,
    task: JoinHandle<()>,
}

impl SinkWorker {
    /// Start a worker for `sink` on the current runtime.
    pub fn spawn(sink: SharedSink, stats: SharedPipelineStats) -> Self {
        let (tx, rx) = mpsc::channel(SINK_QUEUE_CAPACITY);
        let name = sink.name().to_string();
        let task = tokio::spawn(run_worker(sink, stats.clone(), rx));
        Self {
            name,
            tx,
            stats,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a record without waiting. Returns false when the record was
    /// dropped because the queue is full or the worker is gone; the drop is
    /// counted as a sink failure.
    pub fn offer(&self, record: DetectionRecord) -> bool {
        match self.tx.try_send(SinkJob::Store(record)) {
            Ok(()) => true,
            Err(TrySendError::Full(SinkJob::Store(record))) => {
                warn!(sink = %self.name, record_id = %record.id, "Sink queue full, record dropped");
                self.stats.record_sink_failure();
                false
            }
            Err(_) => {
                warn!(sink = %self.name, "Sink worker gone, record dropped");
                self.stats.record_sink_failure();
                false
            }
        }
    }

    /// Wait until every record queued so far has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(SinkJob::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Drain the queue and end the worker.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(sink = %self.name, error = %e, "Sink worker ended abnormally");
        }
    }
}

async fn run_worker(sink: SharedSink, stats: SharedPipelineStats, mut rx: mpsc::Receiver<SinkJob>) {
    while let Some(job) = rx.recv().await {
        match job {
            SinkJob::Store(record) => {
                if let Err(e) = sink.store(&record).await {
                    warn!(sink = sink.name(), record_id = %record.id, error = %e, "Failed to store record");
                    stats.record_sink_failure();
                }
            }
            SinkJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(sink = sink.name(), "Sink worker finished");
}

/// Appends one JSON object per line to a local file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn store(&self, record: &DetectionRecord) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| SinkError::Serialization(e.to_string()))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::Io(e.to_string()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::Io(e.to_string()))?;
        file.flush().await.map_err(|e| SinkError::Io(e.to_string()))
    }
}

/// Inserts records into a PostgREST-style table endpoint
/// (`POST {url}/rest/v1/{table}`).
#[cfg(feature = "gateway")]
pub struct RestSink {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

#[cfg(feature = "gateway")]
impl RestSink {
    pub fn new(url: &str, token: String, table: &str) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| SinkError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
            token,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(feature = "gateway")]
#[async_trait]
impl RecordSink for RestSink {
    fn name(&self) -> &str {
        "rest"
    }

    async fn store(&self, record: &DetectionRecord) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.token)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Prefer", "return=minimal")
            .json(&[record])
            .send()
            .await
            .map_err(|e| SinkError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SinkError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize;
    use serde_json::json;

    #[tokio::test]
    async fn test_jsonl_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("nested").join("records.jsonl"));

        for id in ["a", "b"] {
            let record = normalize(&json!({ "id": id, "risk_level": "high" }), "s1");
            sink.store(&record).await.unwrap();
        }

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], "a");
        assert_eq!(lines[1]["risk_level"], "high");
        assert_eq!(lines[1]["session_id"], "s1");
    }

    struct StallingSink {
        delay: std::time::Duration,
        stored: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecordSink for StallingSink {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn store(&self, record: &DetectionRecord) -> Result<(), SinkError> {
            tokio::time::sleep(self.delay).await;
            self.stored.lock().unwrap().push(record.id.clone());
            Err(SinkError::Server {
                status: 503,
                message: "unavailable".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_offer_does_not_wait_for_sink() {
        let sink = Arc::new(StallingSink {
            delay: std::time::Duration::from_secs(10),
            stored: Default::default(),
        });
        let stats = crate::stats::create_shared_stats();
        let worker = SinkWorker::spawn(sink.clone(), stats.clone());

        let before = tokio::time::Instant::now();
        for id in ["a", "b", "c"] {
            assert!(worker.offer(normalize(&json!({ "id": id }), "s1")));
        }
        assert_eq!(before.elapsed(), std::time::Duration::ZERO);

        worker.flush().await;
        assert_eq!(*sink.stored.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(stats.snapshot().sink_failures, 3);
        worker.close().await;
    }

    #[tokio::test]
    async fn test_worker_counts_dropped_records_when_full() {
        let sink = Arc::new(StallingSink {
            delay: std::time::Duration::from_secs(3600),
            stored: Default::default(),
        });
        let stats = crate::stats::create_shared_stats();
        let worker = SinkWorker::spawn(sink, stats.clone());

        // The worker holds at most one record in flight beyond the queue
        let offered = SINK_QUEUE_CAPACITY + 2;
        let accepted = (0..offered)
            .filter(|i| worker.offer(normalize(&json!({ "id": i.to_string() }), "s1")))
            .count();

        assert!(accepted <= SINK_QUEUE_CAPACITY + 1);
        assert_eq!(stats.snapshot().sink_failures, (offered - accepted) as u64);
    }

    #[test]
    fn test_build_sink_none() {
        assert!(build_sink(&SinkConfig::None).unwrap().is_none());
    }

    #[cfg(feature = "gateway")]
    #[test]
    fn test_rest_sink_endpoint() {
        let sink = RestSink::new("https://db.example.org/", "key".to_string(), "pedestrians").unwrap();
        assert_eq!(sink.endpoint(), "https://db.example.org/rest/v1/pedestrians");
        assert_eq!(sink.name(), "rest");
    }
}
