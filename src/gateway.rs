//! Client for the remote detection service.
//!
//! The service exposes three operations: start and stop the camera, and fetch
//! the latest session snapshot. [`DetectionGateway`] is the seam the poll
//! scheduler talks to; [`HttpGateway`] is the production implementation.

use crate::core::ServerCounts;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the detection service, e.g. `http://127.0.0.1:5000`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Create a new gateway configuration with a 10 second timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the base URL.
    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn start_url(&self) -> String {
        format!("{}/start_webcam", self.url())
    }

    pub fn stop_url(&self) -> String {
        format!("{}/stop_webcam", self.url())
    }

    pub fn session_data_url(&self) -> String {
        format!("{}/session_data", self.url())
    }

    /// Live annotated video stream. Not consumed by the pipeline.
    pub fn video_feed_url(&self) -> String {
        format!("{}/video_feed", self.url())
    }
}

/// Gateway client error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Configuration error
    Config(String),
    /// Service unreachable
    Network(String),
    /// Service answered with a non-2xx status
    Server { status: u16, message: String },
    /// Body was not valid JSON or did not have the expected shape
    Malformed(String),
}

impl GatewayError {
    /// Unreachable or non-2xx.
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Network(_) | GatewayError::Server { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, GatewayError::Malformed(_))
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Config(msg) => write!(f, "Gateway config error: {msg}"),
            GatewayError::Network(msg) => write!(f, "Gateway network error: {msg}"),
            GatewayError::Server { status, message } => {
                write!(f, "Gateway server error ({status}): {message}")
            }
            GatewayError::Malformed(msg) => write!(f, "Gateway sent a malformed payload: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Validated `/session_data` body.
///
/// Only the outer shape is checked here. Individual detections stay raw
/// until the normalizer repairs them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPayload {
    /// Aggregate counts, when the service reported any
    pub counts: Option<ServerCounts>,
    /// Raw detection objects; empty when absent or not an array
    pub pedestrians: Vec<Value>,
}

impl RawPayload {
    /// Validate a parsed body. Anything other than a JSON object is malformed.
    pub fn from_json(body: Value) -> Result<Self, GatewayError> {
        let mut obj = match body {
            Value::Object(obj) => obj,
            other => {
                return Err(GatewayError::Malformed(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let pedestrians = match obj.remove("pedestrians") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let counts = ServerCounts::from_json(&Value::Object(obj));

        Ok(Self {
            counts,
            pedestrians,
        })
    }

    /// Parse and validate a response body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GatewayError> {
        let body: Value =
            serde_json::from_slice(bytes).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        Self::from_json(body)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Operations of the detection service.
#[async_trait]
pub trait DetectionGateway: Send + Sync {
    /// Ask the service to start producing detections.
    async fn start(&self) -> Result<(), GatewayError>;

    /// Ask the service to stop.
    async fn stop(&self) -> Result<(), GatewayError>;

    /// Fetch the latest snapshot.
    async fn poll(&self) -> Result<RawPayload, GatewayError>;
}

/// HTTP client for the detection service.
#[cfg(feature = "gateway")]
pub struct HttpGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

#[cfg(feature = "gateway")]
impl HttpGateway {
    /// Create a new gateway client.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("streetsense-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    async fn post_signal(&self, url: String) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }
}

#[cfg(feature = "gateway")]
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(GatewayError::Server {
        status: status.as_u16(),
        message,
    })
}

#[cfg(feature = "gateway")]
#[async_trait]
impl DetectionGateway for HttpGateway {
    async fn start(&self) -> Result<(), GatewayError> {
        self.post_signal(self.config.start_url()).await
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.post_signal(self.config.stop_url()).await
    }

    async fn poll(&self) -> Result<RawPayload, GatewayError> {
        let response = self
            .client
            .get(self.config.session_data_url())
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let body = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        RawPayload::from_slice(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gateway_config_urls() {
        let config = GatewayConfig::new("http://127.0.0.1:5000/");
        assert_eq!(config.url(), "http://127.0.0.1:5000");
        assert_eq!(config.start_url(), "http://127.0.0.1:5000/start_webcam");
        assert_eq!(config.stop_url(), "http://127.0.0.1:5000/stop_webcam");
        assert_eq!(config.session_data_url(), "http://127.0.0.1:5000/session_data");
    }

    #[test]
    fn test_payload_with_counts_and_records() {
        let payload = RawPayload::from_json(json!({
            "totalPedestrians": 1,
            "highRisk": 1,
            "pedestrians": [{ "id": "p1" }]
        }))
        .unwrap();

        let counts = payload.counts.unwrap();
        assert_eq!(counts.total_pedestrians, 1);
        assert_eq!(counts.medium_risk, 0);
        assert_eq!(payload.pedestrians.len(), 1);
    }

    #[test]
    fn test_payload_non_array_pedestrians_ignored() {
        let payload = RawPayload::from_json(json!({ "pedestrians": { "id": "p1" } })).unwrap();
        assert!(payload.pedestrians.is_empty());
        assert!(payload.counts.is_none());
    }

    #[test]
    fn test_payload_malformed() {
        let err = RawPayload::from_slice(b"<html>oops</html>").unwrap_err();
        assert!(err.is_malformed());
        assert!(!err.is_transport());

        let err = RawPayload::from_json(json!([1, 2, 3])).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_error_classes() {
        let err = GatewayError::Server {
            status: 503,
            message: "busy".to_string(),
        };
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Gateway server error (503): busy");
    }
}
