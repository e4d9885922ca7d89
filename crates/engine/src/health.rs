//! Operational HTTP endpoint: `GET /health`, `GET /metrics`, `GET /targets`,
//! `GET /config`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use ifthen_queue::QueueConsumer;
use ifthen_targets::{AgentMetadata, TargetRegistry};

use crate::metrics::{EngineMetrics, MetricsSnapshot};

pub struct HealthState {
    pub metrics: Arc<EngineMetrics>,
    pub consumer: Arc<dyn QueueConsumer>,
    pub registry: Arc<TargetRegistry>,
    /// Redacted effective configuration served at `/config`.
    pub config: Value,
    pub started_at: Instant,
}

impl HealthState {
    pub fn new(
        metrics: Arc<EngineMetrics>,
        consumer: Arc<dyn QueueConsumer>,
        registry: Arc<TargetRegistry>,
    ) -> Self {
        Self {
            metrics,
            consumer,
            registry,
            config: Value::Null,
            started_at: Instant::now(),
        }
    }

    /// Attach the redacted configuration view, usually
    /// `Config::redacted_summary()`.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/targets", get(targets_handler))
        .route("/config", get(config_handler))
        .with_state(state)
}

/// `200` while the queue is reachable, `503` otherwise.
async fn health_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let uptime_secs = state.started_at.elapsed().as_secs();
    match state.consumer.health_check().await {
        Ok(queue) => {
            let dlq_depth = state.consumer.dlq_depth().await.ok().flatten();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "uptime_secs": uptime_secs,
                    "queue": queue,
                    "dlq_depth": dlq_depth,
                    "in_flight": state.metrics.snapshot().in_flight,
                })),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "degraded",
                "uptime_secs": uptime_secs,
                "error": e.to_string(),
            })),
        ),
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn targets_handler(State(state): State<Arc<HealthState>>) -> Json<Vec<AgentMetadata>> {
    Json(state.registry.metadata())
}

async fn config_handler(State(state): State<Arc<HealthState>>) -> Json<Value> {
    Json(state.config.clone())
}

/// Serve [`router`] on `0.0.0.0:port` until `shutdown` flips to `true`.
pub fn spawn_health_server(
    port: u16,
    state: Arc<HealthState>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(port, error = %e, "failed to bind health HTTP server");
                return;
            }
        };

        tracing::info!(port, "health HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut rx = shutdown;
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .ok();

        tracing::info!("health HTTP server stopped");
    })
}
