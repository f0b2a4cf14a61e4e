//! HTTP ingestion endpoint for the rollup publisher.
//!
//! This module provides an HTTP server that:
//! - Accepts OpenTSDB-style data points via `POST /api/put`
//! - Publishes them into the shared [`RollupPublisher`]
//! - Exposes publisher statistics via `GET /api/stats`
//!
//! # Architecture
//!
//! ```text
//! collector ──→ POST /api/put ──→ RollupPublisher ──→ sink ──→ time-series store
//!                                       ↓
//!                                GET /api/stats
//! ```

use crate::publisher::RollupPublisher;
use crate::stats::StatsSnapshot;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Timestamps with an absolute value below this are in seconds.
const SECONDS_THRESHOLD: i64 = 10_000_000_000;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// One data point as accepted by `/api/put`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingDataPoint {
    pub metric: String,
    /// Seconds (up to 10 digits) or milliseconds since the Unix epoch
    pub timestamp: i64,
    pub value: PointValue,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Data point value; OpenTSDB clients send either a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Number(f64),
    Text(String),
}

impl PointValue {
    /// Numeric value, parsing the string form.
    pub fn to_f64(&self) -> Result<f64, String> {
        match self {
            PointValue::Number(value) => Ok(*value),
            PointValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| format!("Invalid value '{text}'")),
        }
    }
}

/// `/api/put` accepts a single data point or an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PutBody {
    One(IncomingDataPoint),
    Many(Vec<IncomingDataPoint>),
}

impl PutBody {
    fn into_points(self) -> Vec<IncomingDataPoint> {
        match self {
            PutBody::One(point) => vec![point],
            PutBody::Many(points) => points,
        }
    }
}

/// Per-point failure detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutFailure {
    pub index: usize,
    pub error: String,
}

/// Response from the put endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutResponse {
    pub success: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<PutFailure>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Convert an OpenTSDB timestamp to epoch milliseconds.
pub fn normalize_timestamp(timestamp: i64) -> i64 {
    if timestamp.abs() < SECONDS_THRESHOLD {
        timestamp.saturating_mul(1000)
    } else {
        timestamp
    }
}

/// GET /health
async fn health(State(state): State<Arc<RollupPublisher>>) -> Json<HealthResponse> {
    let status = if state.is_shut_down() { "stopping" } else { "ok" };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/stats
async fn stats(State(state): State<Arc<RollupPublisher>>) -> Json<StatsSnapshot> {
    Json(state.collect_stats())
}

/// POST /api/put
///
/// Publishes every data point in the body. Responds 400 only when no
/// point was accepted; partial failures are listed in the body.
async fn put(
    State(state): State<Arc<RollupPublisher>>,
    Json(body): Json<PutBody>,
) -> (StatusCode, Json<PutResponse>) {
    let points = body.into_points();
    let mut response = PutResponse {
        success: 0,
        failed: 0,
        errors: Vec::new(),
    };

    for (index, point) in points.iter().enumerate() {
        let timestamp = normalize_timestamp(point.timestamp);
        let result = point
            .value
            .to_f64()
            .and_then(|value| {
                state
                    .publish(&point.metric, timestamp, value, &point.tags)
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => response.success += 1,
            Err(error) => {
                response.failed += 1;
                response.errors.push(PutFailure { index, error });
            }
        }
    }

    let status = if response.success == 0 && response.failed > 0 {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    (status, Json(response))
}

/// Build the router for a publisher.
pub fn router(publisher: Arc<RollupPublisher>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/put", post(put))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(publisher)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    publisher: Arc<RollupPublisher>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(publisher);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Rollup server listening on http://{}", actual_addr);

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(normalize_timestamp(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp(1_700_000_000_123), 1_700_000_000_123);
        assert_eq!(normalize_timestamp(0), 0);
    }

    #[test]
    fn test_put_body_single_or_many() {
        let one: PutBody =
            serde_json::from_str(r#"{"metric":"m","timestamp":1,"value":1.0}"#).unwrap();
        assert_eq!(one.into_points().len(), 1);

        let many: PutBody = serde_json::from_str(
            r#"[{"metric":"m","timestamp":1,"value":1.0,"tags":{"host":"a"}},
                {"metric":"n","timestamp":2,"value":2}]"#,
        )
        .unwrap();
        let points = many.into_points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].tags["host"], "a");
        assert_eq!(points[1].value, PointValue::Number(2.0));
    }

    #[test]
    fn test_value_as_number_or_string() {
        let point: IncomingDataPoint =
            serde_json::from_str(r#"{"metric":"m","timestamp":1,"value":"42"}"#).unwrap();
        assert_eq!(point.value.to_f64(), Ok(42.0));

        let point: IncomingDataPoint =
            serde_json::from_str(r#"{"metric":"m","timestamp":1,"value":" 1.5e3 "}"#).unwrap();
        assert_eq!(point.value.to_f64(), Ok(1500.0));

        let point: IncomingDataPoint =
            serde_json::from_str(r#"{"metric":"m","timestamp":1,"value":"forty"}"#).unwrap();
        assert!(point.value.to_f64().is_err());
    }
}
