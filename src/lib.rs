//! StreetSense Agent - real-time pedestrian risk telemetry aggregator.
//!
//! The agent drives a remote detection service, polls its session snapshot
//! on a fixed cadence, and keeps a deduplicated history of detections with
//! rolling totals and a bounded time-series for display. The history can be
//! exported as CSV at any time.
//!
//! # Guarantees
//!
//! - **Idempotent merge**: a record id is accepted once; later copies are dropped
//! - **Bounded memory for display**: the time-series holds at most 20 samples
//! - **Availability over strictness**: malformed record fields are repaired,
//!   never rejected, and a failed poll never ends a session
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        StreetSense Agent                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐  │
//! │  │   Poll    │──▶│  Gateway  │──▶│ Normalizer │──▶│ History  │  │
//! │  │ Scheduler │   │  (HTTP)   │   │            │   │ (dedup)  │  │
//! │  └───────────┘   └───────────┘   └────────────┘   └──────────┘  │
//! │        │                                            │    │       │
//! │        ▼                                            ▼    ▼       │
//! │  ┌───────────┐                            ┌─────────┐ ┌────────┐ │
//! │  │   Stats   │                            │ Summary │ │ Series │ │
//! │  └───────────┘                            │ + Sink  │ │ (x20)  │ │
//! │                                           └─────────┘ └────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streetsense_agent::{scheduler, GatewayConfig, HttpGateway, PollScheduler};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = HttpGateway::new(GatewayConfig::new("http://127.0.0.1:5000"))?;
//! let (handle, task) = scheduler::spawn(PollScheduler::new(Arc::new(gateway)));
//!
//! handle.start().await?;
//! tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//! handle.stop().await?;
//!
//! if let Ok(csv) = handle.export().await? {
//!     println!("{}", csv.content);
//! }
//! drop(handle);
//! let _scheduler = task.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod gateway;
pub mod scheduler;
pub mod sink;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, SinkConfig};
pub use core::{
    export_csv, merge, normalize, summarize, CsvDocument, DetectionRecord, ExportError, History,
    RiskLevel, Session, SessionSummary, TimeSeries, TimeSeriesSample,
};
pub use gateway::{DetectionGateway, GatewayConfig, GatewayError, RawPayload};
pub use scheduler::{PollScheduler, SchedulerError, SchedulerHandle, SchedulerState, SessionView};
pub use sink::{build_sink, JsonlSink, RecordSink, SinkError, SinkWorker};
pub use stats::{PipelineStats, SharedPipelineStats, StatsSnapshot};

#[cfg(feature = "gateway")]
pub use gateway::HttpGateway;

#[cfg(feature = "gateway")]
pub use sink::RestSink;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
