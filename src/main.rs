//! StreetSense Agent CLI
//!
//! Drives a detection session against the StreetSense service and exports
//! the collected history.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use streetsense_agent::{config::Config, stats::create_shared_stats_with_persistence, VERSION};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway")]
use streetsense_agent::{
    build_sink, core::RiskLevel, scheduler, ExportError, GatewayConfig, HttpGateway, PollScheduler,
    SchedulerHandle, SinkConfig,
};

/// How long `run` waits for queued sink writes on exit.
#[cfg(feature = "gateway")]
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "streetsense")]
#[command(author = "StreetSense")]
#[command(version = VERSION)]
#[command(about = "Real-time pedestrian risk telemetry aggregator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a detection session and poll until Ctrl+C
    Run {
        /// Base URL of the detection service
        #[arg(long)]
        gateway_url: Option<String>,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Also append accepted records to this JSON lines file
        #[arg(long)]
        sink_jsonl: Option<PathBuf>,

        /// Skip the CSV export when the session ends
        #[arg(long)]
        no_export: bool,
    },

    /// Show configuration and cumulative pipeline statistics
    Status,

    /// Show configuration
    Config,

    /// Serve recorded session data as a stand-in detection service
    #[cfg(feature = "server")]
    Serve {
        /// JSON file holding an array of /session_data bodies
        #[arg(long)]
        replay: PathBuf,

        /// Port to listen on
        #[arg(long, default_value = "5000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            gateway_url,
            interval_ms,
            duration_secs,
            sink_jsonl,
            no_export,
        } => {
            cmd_run(gateway_url, interval_ms, duration_secs, sink_jsonl, no_export).await;
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
        #[cfg(feature = "server")]
        Commands::Serve { replay, port } => {
            cmd_serve(replay, port).await;
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("streetsense_agent=info,streetsense=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "gateway")]
async fn cmd_run(
    gateway_url: Option<String>,
    interval_ms: Option<u64>,
    duration_secs: Option<u64>,
    sink_jsonl: Option<PathBuf>,
    no_export: bool,
) {
    println!("StreetSense Agent v{VERSION}");
    println!();

    // Load configuration and apply overrides
    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config ({e}), using defaults");
        Config::default()
    });
    if let Some(url) = gateway_url {
        config.gateway_url = url;
    }
    if let Some(ms) = interval_ms {
        config.poll_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(path) = sink_jsonl {
        config.sink = SinkConfig::Jsonl { path };
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let gateway_config =
        GatewayConfig::new(config.gateway_url.clone()).with_timeout(config.request_timeout());
    let gateway = match HttpGateway::new(gateway_config) {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let sink = match build_sink(&config.sink) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("Warning: Sink unavailable ({e}), continuing in memory only");
            None
        }
    };

    println!("  Detection service: {}", config.gateway_url);
    println!("  Poll interval: {}ms", config.poll_interval.as_millis());
    println!(
        "  Durable sink: {}",
        sink.as_ref().map(|s| s.name()).unwrap_or("disabled")
    );
    println!();

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let poller = PollScheduler::new(std::sync::Arc::new(gateway))
        .with_interval(config.poll_interval)
        .with_sink(sink)
        .with_stats(stats.clone());
    let (handle, task) = scheduler::spawn(poller);

    if let Err(e) = handle.start().await {
        eprintln!("Error: {e}");
        eprintln!("Could not connect to the detection server. Is it running?");
        std::process::exit(1);
    }

    let session_id = handle
        .view()
        .await
        .ok()
        .and_then(|v| v.session_id)
        .unwrap_or_default();
    println!("Session ID: {session_id}");
    println!("Press Ctrl+C to stop");
    println!();

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    ctrlc_handler(stop_tx);

    let deadline = duration_secs.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    report_until_stopped(&handle, &mut stop_rx, deadline).await;

    println!();
    println!("Stopping detection...");
    if let Err(e) = handle.stop().await {
        eprintln!("Warning: {e}");
    }

    if let Ok(view) = handle.view().await {
        let summary = view.summary;
        println!(
            "Final totals: {} pedestrians ({} high, {} medium, {} low), {} unique records",
            summary.total, summary.high, summary.medium, summary.low, view.record_count
        );
    }

    if !no_export {
        match handle.export().await {
            Ok(Ok(document)) => match document.write_to(&config.export_path) {
                Ok(path) => println!("Exported {} records to {:?}", document.rows, path),
                Err(e) => eprintln!("Error writing export: {e}"),
            },
            Ok(Err(ExportError::Empty)) => {
                println!("No data to download: no detections were collected this session.")
            }
            Ok(Err(e)) => eprintln!("Error exporting: {e}"),
            Err(e) => eprintln!("Error exporting: {e}"),
        }
    }

    drop(handle);
    match task.await {
        Ok(mut poller) => {
            if tokio::time::timeout(SINK_DRAIN_TIMEOUT, poller.close_sink())
                .await
                .is_err()
            {
                eprintln!("Warning: Sink did not finish pending writes, some records were not stored");
            }
        }
        Err(e) => eprintln!("Warning: Scheduler task ended abnormally: {e}"),
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save pipeline stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
}

#[cfg(not(feature = "gateway"))]
async fn cmd_run(
    _gateway_url: Option<String>,
    _interval_ms: Option<u64>,
    _duration_secs: Option<u64>,
    _sink_jsonl: Option<PathBuf>,
    _no_export: bool,
) {
    eprintln!("Error: run requires the gateway feature (not enabled at compile time)");
    std::process::exit(1);
}

/// Print one status line per second until Ctrl+C or the deadline.
#[cfg(feature = "gateway")]
async fn report_until_stopped(
    handle: &SchedulerHandle,
    stop_rx: &mut tokio::sync::mpsc::UnboundedReceiver<()>,
    deadline: Option<tokio::time::Instant>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut was_disconnected = false;

    loop {
        let timeout = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = stop_rx.recv() => return,
            _ = timeout => return,
            _ = ticker.tick() => {}
        }

        let Ok(view) = handle.view().await else {
            return;
        };

        if view.connection_error {
            if !was_disconnected {
                eprintln!("[Connection] Detection service unreachable, retrying...");
            }
            was_disconnected = true;
            continue;
        }
        if was_disconnected {
            println!("[Connection] Restored");
            was_disconnected = false;
        }

        let summary = view.summary;
        println!(
            "[{}] total: {:>3} | high: {:>3} ({:>3.0}%) | medium: {:>3} | low: {:>3} | records: {}",
            chrono::Local::now().format("%H:%M:%S"),
            summary.total,
            summary.high,
            summary.share(RiskLevel::High) * 100.0,
            summary.medium,
            summary.low,
            view.record_count
        );
    }
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("StreetSense Agent Status");
    println!("========================");
    println!();

    println!("Configuration:");
    println!("  Detection service: {}", config.gateway_url);
    println!("  Poll interval: {}ms", config.poll_interval.as_millis());
    println!("  Export directory: {:?}", config.export_path);
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let stats = create_shared_stats_with_persistence(stats_path);
        let snapshot = stats.snapshot();
        println!("Cumulative Statistics:");
        println!("  Polls succeeded: {}", snapshot.polls_ok);
        println!("  Polls failed: {}", snapshot.polls_failed);
        println!("  Records accepted: {}", snapshot.records_accepted);
        println!("  Duplicates dropped: {}", snapshot.duplicates_dropped);
        println!("  Sink failures: {}", snapshot.sink_failures);
        println!("  Exports written: {}", snapshot.exports);
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

#[cfg(feature = "server")]
async fn cmd_serve(replay: PathBuf, port: u16) {
    use streetsense_agent::server::{load_frames, run, ReplayConfig};

    let frames = match load_frames(&replay) {
        Ok(frames) => frames,
        Err(e) => {
            eprintln!("Error loading replay file: {e}");
            std::process::exit(1);
        }
    };
    println!("Loaded {} recorded frames from {:?}", frames.len(), replay);

    let (addr, shutdown_tx) = match run(ReplayConfig::new(port, frames)).await {
        Ok(running) => running,
        Err(e) => {
            eprintln!("Error starting replay service: {e}");
            std::process::exit(1);
        }
    };
    println!("Replay detection service on http://{addr}");
    println!("Press Ctrl+C to stop");

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    ctrlc_handler(stop_tx);
    let _ = stop_rx.recv().await;
    let _ = shutdown_tx.send(());
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(stop: tokio::sync::mpsc::UnboundedSender<()>) {
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop.send(());
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
