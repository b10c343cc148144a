//! Health Check and Metrics Endpoint
//!
//! Separate HTTP listener for probes and Prometheus scraping, kept off the
//! client-facing port so probes are never rate limited.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health report
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (upstream feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::bitstamp::{ConnectionState, FeedSnapshot, FeedState};
use crate::infrastructure::broadcast::OutboundHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedSnapshot,
    /// Open client connections.
    pub clients: usize,
    /// Subscription counts.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected.
    Healthy,
    /// Feed reconnecting; clients stay connected but receive no prices.
    Degraded,
    /// Feed down or given up.
    Unhealthy,
}

impl HealthStatus {
    /// Status implied by the feed connection state.
    #[must_use]
    pub const fn from_feed(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Reconnecting => Self::Degraded,
            ConnectionState::Disconnected | ConnectionState::Error => Self::Unhealthy,
        }
    }
}

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriptionStatus {
    /// Instruments with at least one subscriber.
    pub instruments: usize,
    /// Connections holding at least one subscription.
    pub subscribed_clients: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// What the health endpoints report on.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedState>,
    hub: Arc<OutboundHub>,
    registry: Arc<SubscriptionRegistry>,
}

impl HealthServerState {
    /// Start the uptime clock now.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedState>,
        hub: Arc<OutboundHub>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            hub,
            registry,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Probe and metrics listener.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Health server on `port`.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve probes and metrics until the token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if the port cannot be bound or the server
    /// stops with an error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], self.port)))
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;
        tracing::info!(port = self.port, "Health server listening");

        let shutdown = self.cancel.cancelled_owned();
        let result = axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await;

        tracing::info!("Health server stopped");
        result.map_err(|e| HealthServerError::ServerFailed(e.to_string()))
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> &'static str {
    "OK"
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = state.feed.snapshot();
    let stats = state.registry.stats();

    HealthResponse {
        status: HealthStatus::from_feed(feed.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        clients: state.hub.connection_count(),
        subscriptions: SubscriptionStatus {
            instruments: stats.instrument_count,
            subscribed_clients: stats.connection_count,
        },
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The health port could not be bound.
    #[error("health port {0} unavailable: {1}")]
    BindFailed(u16, String),

    /// The server stopped with an error.
    #[error("health server failed: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;

    fn state(feed: Arc<FeedState>) -> Arc<HealthServerState> {
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            feed,
            OutboundHub::new_shared(4),
            Arc::new(SubscriptionRegistry::new()),
        ))
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test_case(HealthStatus::Healthy, "\"healthy\"")]
    #[test_case(HealthStatus::Degraded, "\"degraded\"")]
    #[test_case(HealthStatus::Unhealthy, "\"unhealthy\"")]
    fn status_serializes_lowercase(status: HealthStatus, json: &str) {
        assert_eq!(serde_json::to_string(&status).unwrap(), json);
    }

    #[test_case(ConnectionState::Connected => HealthStatus::Healthy)]
    #[test_case(ConnectionState::Reconnecting => HealthStatus::Degraded)]
    #[test_case(ConnectionState::Disconnected => HealthStatus::Unhealthy)]
    #[test_case(ConnectionState::Error => HealthStatus::Unhealthy)]
    fn status_follows_feed(state: ConnectionState) -> HealthStatus {
        HealthStatus::from_feed(state)
    }

    #[tokio::test]
    async fn readiness_tracks_feed_connection() {
        let feed = Arc::new(FeedState::new());
        let app = router(state(Arc::clone(&feed)));

        let (status, body) = fetch(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");

        feed.set_state(ConnectionState::Connected);
        let (status, body) = fetch(app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn health_reports_feed_and_clients() {
        let feed = Arc::new(FeedState::new());
        feed.set_reconnecting(2);
        let state = state(feed);
        let _rx = state.hub.register(7);

        let (status, body) = fetch(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["feed"]["state"], "reconnecting");
        assert_eq!(json["feed"]["reconnect_attempts"], 2);
        assert_eq!(json["clients"], 1);
        assert_eq!(json["subscriptions"]["instruments"], 0);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (status, body) = fetch(router(state(Arc::new(FeedState::new()))), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
