//! Client-Facing Server
//!
//! axum server on the relay port.
//!
//! # Endpoints
//!
//! - `GET /streaming` - WebSocket stream of prices and OHLC summaries
//! - `GET /ohlc/{currency_pair}` - current OHLC snapshot (rate limited)
//!
//! HTTP API routes sit behind the per-IP/per-user rate limiter. The
//! WebSocket upgrade does not.

mod ohlc;
mod rate_limit;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{Router, middleware};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::Clock;
use crate::application::services::SubscriptionService;
use crate::domain::rate_limit::RateLimiter;
use crate::domain::subscription::SubscriptionRegistry;
use crate::domain::window::WindowStore;
use crate::infrastructure::broadcast::OutboundHub;

pub use rate_limit::{ANONYMOUS_USER, RateLimitRejection};

// =============================================================================
// Application State
// =============================================================================

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    /// Per-instrument price windows.
    pub store: Arc<WindowStore>,
    /// Connection subscriptions.
    pub registry: Arc<SubscriptionRegistry>,
    /// Subscription request handling.
    pub subscriptions: Arc<SubscriptionService>,
    /// Outbound queues per connection.
    pub hub: Arc<OutboundHub>,
    /// HTTP request limiter.
    pub limiter: Arc<RateLimiter>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("connections", &self.hub.connection_count())
            .field("registry", &self.registry.stats())
            .finish_non_exhaustive()
    }
}

/// Build the client-facing router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/ohlc/{currency_pair}", get(ohlc::ohlc_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/streaming", get(ws::streaming_handler))
        .merge(api)
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Client-facing HTTP/WebSocket server.
pub struct RelayServer {
    port: u16,
    state: AppState,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with an error.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Relay server listening");
        serve(listener, self.state, self.cancel).await?;
        tracing::info!("Relay server stopped");
        Ok(())
    }
}

/// Serve the router on an already bound listener until cancelled.
///
/// # Errors
///
/// Returns `ServerError::ServerFailed` if the server stops with an error.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .map_err(|e| ServerError::ServerFailed(e.to_string()))
}

// =============================================================================
// Errors
// =============================================================================

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{ManualClock, MockUpstreamControl};
    use crate::domain::rate_limit::RateLimitConfig;
    use crate::domain::streaming::OhlcUpdate;
    use crate::domain::window::{NO_DATA_SENTINEL, Tick};

    const NOW: i64 = 1_700_000_000;

    fn state() -> AppState {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_apply().return_const(());
        AppState {
            store: Arc::new(WindowStore::new(Duration::from_secs(60))),
            registry: Arc::clone(&registry),
            subscriptions: Arc::new(SubscriptionService::new(registry, Arc::new(upstream))),
            hub: OutboundHub::new_shared(8),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
            clock: Arc::new(ManualClock::new(Utc.timestamp_opt(NOW, 0).unwrap())),
        }
    }

    fn ohlc_request(uri: &str, peer: [u8; 4]) -> Request<Body> {
        let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40_000))));
        request
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ohlc_reports_window_summary() {
        let state = state();
        state.store.record_tick(&Tick::new("btcusd", dec!(105), NOW - 10));
        state.store.record_tick(&Tick::new("btcusd", dec!(102), NOW - 5));

        let response = router(state)
            .oneshot(ohlc_request("/ohlc/BTCUSD?user=alice", [10, 0, 0, 1]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let update: OhlcUpdate = body_json(response).await;
        assert_eq!(update.currency_pair, "btcusd");
        assert_eq!(update.o, "105");
        assert_eq!(update.h, "105");
        assert_eq!(update.l, "102");
        assert_eq!(update.c, "102");
    }

    #[tokio::test]
    async fn ohlc_for_unknown_pair_reports_sentinel() {
        let response = router(state())
            .oneshot(ohlc_request("/ohlc/dogeusd", [10, 0, 0, 1]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let update: OhlcUpdate = body_json(response).await;
        assert_eq!(update.o, NO_DATA_SENTINEL);
        assert_eq!(update.c, NO_DATA_SENTINEL);
    }

    #[tokio::test]
    async fn fourth_request_from_one_ip_is_rejected() {
        let app = router(state());

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(ohlc_request("/ohlc/btcusd?user=alice", [10, 0, 0, 2]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(ohlc_request("/ohlc/btcusd?user=alice", [10, 0, 0, 2]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: RateLimitRejection = body_json(response).await;
        assert_eq!(body, RateLimitRejection { ip: 4, id: 4 });
    }

    #[tokio::test]
    async fn missing_user_is_keyed_as_anonymous() {
        let state = state();
        let limiter = Arc::clone(&state.limiter);

        router(state)
            .oneshot(ohlc_request("/ohlc/btcusd", [10, 0, 0, 3]))
            .await
            .unwrap();

        assert_eq!(limiter.user_log_len(ANONYMOUS_USER), 1);
        assert_eq!(limiter.ip_log_len("10.0.0.3"), 1);
    }

    #[tokio::test]
    async fn streaming_route_is_not_rate_limited() {
        let state = state();
        let limiter = Arc::clone(&state.limiter);

        // Not an upgrade request, so the extractor rejects it before any handler runs.
        let response = router(state)
            .oneshot(ohlc_request("/streaming", [10, 0, 0, 4]))
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limiter.ip_log_len("10.0.0.4"), 0);
    }
}
