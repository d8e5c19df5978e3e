//! Liveness and readiness endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health snapshot returned by the health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub processor_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Shared health state, updated by the worker loop and the processor health check.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

struct HealthStateInner {
    broker_connected: bool,
    processor_healthy: bool,
    /// Set by the periodic health check, cleared when it recovers
    processor_error: Option<String>,
    /// Set once when the consume loop ends with an error
    consumer_error: Option<String>,
}

impl HealthState {
    /// Starts as not connected; the worker flips it once consuming.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthStateInner {
                broker_connected: false,
                processor_healthy: true,
                processor_error: None,
                consumer_error: None,
            })),
        }
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        self.inner.write().await.broker_connected = connected;
    }

    /// Result of one processor health check. Never touches the consumer error.
    pub async fn set_processor_status(&self, healthy: bool, error: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.processor_healthy = healthy;
        inner.processor_error = error;
    }

    pub async fn set_consumer_error(&self, error: impl Into<String>) {
        self.inner.write().await.consumer_error = Some(error.into());
    }

    /// Liveness follows the consume loop only. A store outage shows up in
    /// readiness, not here.
    pub async fn is_alive(&self) -> bool {
        self.inner.read().await.consumer_error.is_none()
    }

    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.processor_healthy && inner.consumer_error.is_none()
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let healthy =
            inner.broker_connected && inner.processor_healthy && inner.consumer_error.is_none();
        HealthStatus {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            broker_connected: inner.broker_connected,
            processor_healthy: inner.processor_healthy,
            last_error: inner
                .consumer_error
                .clone()
                .or_else(|| inner.processor_error.clone()),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health router: `/health`, `/healthz`, `/ready`, `/readyz` and optionally `/metrics`.
pub struct HealthServer {
    state: HealthState,
    metrics_handle: Option<PrometheusHandle>,
}

impl HealthServer {
    pub fn new(state: HealthState) -> Self {
        Self {
            state,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .with_state(self.state.clone());

        if let Some(handle) = self.metrics_handle.clone() {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_alive().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}

async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_ready().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}
