//! Rate Limiting Integration Tests
//!
//! Drives the HTTP API router directly with synthetic peer addresses.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use tower::ServiceExt;

use ticker_relay::infrastructure::bitstamp::command_channel;
use ticker_relay::infrastructure::server::{RateLimitRejection, router};
use ticker_relay::{
    AppState, ManualClock, OutboundHub, RateLimitConfig, RateLimiter, SubscriptionRegistry,
    SubscriptionService, WindowStore,
};

fn app(clock: Arc<ManualClock>) -> Router {
    let registry = Arc::new(SubscriptionRegistry::new());
    let (feed_handle, _commands) = command_channel();
    router(AppState {
        store: Arc::new(WindowStore::new(Duration::from_secs(60))),
        registry: Arc::clone(&registry),
        subscriptions: Arc::new(SubscriptionService::new(registry, Arc::new(feed_handle))),
        hub: OutboundHub::new_shared(4),
        limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        clock,
    })
}

async fn request(app: &Router, peer: [u8; 4], user: &str) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder()
        .uri(format!("/ohlc/btcusd?user={user}"))
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 50_000))));

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn user_limit_applies_across_addresses() {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let app = app(Arc::clone(&clock));

    for octet in 1..=5 {
        let (status, _) = request(&app, [10, 0, 1, octet], "carol").await;
        assert_eq!(status, StatusCode::OK);
        clock.advance_secs(1);
    }

    let (status, body) = request(&app, [10, 0, 1, 9], "carol").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let rejection: RateLimitRejection = serde_json::from_slice(&body).unwrap();
    assert_eq!(rejection, RateLimitRejection { ip: 1, id: 6 });
}

#[tokio::test]
async fn limits_reset_after_quiet_window() {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let app = app(Arc::clone(&clock));

    for _ in 0..3 {
        request(&app, [10, 0, 2, 1], "dave").await;
    }
    let (status, _) = request(&app, [10, 0, 2, 1], "dave").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    clock.advance_secs(61);
    let (status, _) = request(&app, [10, 0, 2, 1], "dave").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn new_user_is_admitted_from_busy_address() {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let app = app(clock);

    for _ in 0..4 {
        request(&app, [10, 0, 3, 1], "erin").await;
    }

    let (status, _) = request(&app, [10, 0, 3, 1], "frank").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, [10, 0, 3, 1], "frank").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}
