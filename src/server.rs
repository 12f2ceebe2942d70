//! Replay detection service.
//!
//! Serves the detection service's HTTP contract from a recorded list of
//! `/session_data` bodies, so the agent can be exercised without a camera or
//! a model. No detection happens here.
//!
//! # Routes
//!
//! ```text
//! POST /start_webcam   begin replay from the first frame
//! POST /stop_webcam    stop replay
//! GET  /session_data   next recorded frame while started, empty snapshot otherwise
//! GET  /health         liveness
//! ```

use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

/// Replay server configuration.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Recorded `/session_data` bodies, served in order and then cycled
    pub frames: Vec<Value>,
}

impl ReplayConfig {
    pub fn new(port: u16, frames: Vec<Value>) -> Self {
        Self { port, frames }
    }
}

/// Load recorded frames from a JSON file holding an array of bodies.
pub fn load_frames(path: &Path) -> anyhow::Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Array(frames) => Ok(frames),
        _ => anyhow::bail!("replay file {path:?} must contain a JSON array"),
    }
}

#[derive(Debug, Default)]
struct Playback {
    running: bool,
    cursor: usize,
}

/// Shared server state
pub struct ReplayState {
    frames: Vec<Value>,
    playback: Mutex<Playback>,
}

impl ReplayState {
    pub fn new(frames: Vec<Value>) -> Self {
        Self {
            frames,
            playback: Mutex::new(Playback::default()),
        }
    }
}

/// Response from the start/stop endpoints
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub frames: usize,
}

fn empty_snapshot() -> Value {
    json!({
        "totalPedestrians": 0,
        "highRisk": 0,
        "mediumRisk": 0,
        "lowRisk": 0,
        "pedestrians": []
    })
}

/// GET /health
async fn health(State(state): State<Arc<ReplayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        frames: state.frames.len(),
    })
}

/// POST /start_webcam
async fn start_webcam(State(state): State<Arc<ReplayState>>) -> Json<MessageResponse> {
    let mut playback = state.playback.lock().await;
    let message = if playback.running {
        "Webcam already running"
    } else {
        playback.running = true;
        playback.cursor = 0;
        tracing::info!(frames = state.frames.len(), "Replay started");
        "Webcam started"
    };
    Json(MessageResponse {
        message: message.to_string(),
    })
}

/// POST /stop_webcam
async fn stop_webcam(State(state): State<Arc<ReplayState>>) -> Json<MessageResponse> {
    let mut playback = state.playback.lock().await;
    let message = if playback.running {
        playback.running = false;
        tracing::info!(served = playback.cursor, "Replay stopped");
        "Webcam stopped"
    } else {
        "Webcam not running"
    };
    Json(MessageResponse {
        message: message.to_string(),
    })
}

/// GET /session_data
async fn session_data(State(state): State<Arc<ReplayState>>) -> Json<Value> {
    let mut playback = state.playback.lock().await;
    if !playback.running || state.frames.is_empty() {
        return Json(empty_snapshot());
    }

    let frame = state.frames[playback.cursor % state.frames.len()].clone();
    playback.cursor += 1;
    Json(frame)
}

/// Build the router.
pub fn router(state: Arc<ReplayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start_webcam", post(start_webcam))
        .route("/stop_webcam", post(stop_webcam))
        .route("/session_data", get(session_data))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the replay server
pub async fn run(
    config: ReplayConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ReplayState::new(config.frames));
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Replay detection service listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
