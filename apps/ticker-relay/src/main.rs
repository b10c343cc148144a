//! Ticker Relay Binary
//!
//! Starts the crypto ticker relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-relay
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `TICKER_RELAY_PORT`: client WebSocket/HTTP port (default: 3000)
//! - `TICKER_RELAY_HEALTH_PORT`: health and metrics port (default: 8082)
//! - `TICKER_RELAY_CLIENT_QUEUE_CAPACITY`: outbound frames buffered per client (default: 256)
//! - `TICKER_RELAY_WINDOW_SECS`: OHLC window length (default: 60)
//! - `TICKER_RELAY_EMIT_INTERVAL_SECS`: OHLC emission period (default: 60)
//! - `TICKER_RELAY_RATE_LIMIT_WINDOW_SECS`: rate limit window (default: 60)
//! - `TICKER_RELAY_MAX_REQUESTS_PER_IP`: requests per IP per window (default: 3)
//! - `TICKER_RELAY_MAX_REQUESTS_PER_USER`: requests per user per window (default: 5)
//! - `TICKER_RELAY_FEED_URL`: upstream feed (default: <wss://ws.bitstamp.net>)
//! - `TICKER_RELAY_RECONNECT_DELAY_INITIAL_MS`, `TICKER_RELAY_RECONNECT_DELAY_MAX_SECS`,
//!   `TICKER_RELAY_RECONNECT_DELAY_MULTIPLIER`, `TICKER_RELAY_MAX_RECONNECT_ATTEMPTS`
//! - `OTEL_ENABLED`: enable OpenTelemetry export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: service name (default: ticker-relay)
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ticker_relay::infrastructure::bitstamp::{
    ConnectionState, FeedClient, FeedClientConfig, FeedEvent, FeedState, command_channel,
};
use ticker_relay::infrastructure::metrics::{self, MessageKind};
use ticker_relay::infrastructure::telemetry;
use ticker_relay::{
    AggregationEmitter, AppState, Clock, Delivery, HealthServer, HealthServerState, OutboundHub,
    RateLimiter, RelayConfig, RelayServer, SubscriptionRegistry, SubscriptionService, SystemClock,
    TickIngestor, WindowStore, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Feed events buffered between the client and the ingest task.
const FEED_EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting ticker relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Shared state
    let store = Arc::new(WindowStore::new(config.window.window));
    let registry = Arc::new(SubscriptionRegistry::new());
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.limiter_config()));
    let hub = OutboundHub::new_shared(config.server.client_queue_capacity);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let feed_state = Arc::new(FeedState::new());

    // Upstream feed
    let (feed_handle, feed_commands) = command_channel();
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(FEED_EVENT_BUFFER);
    let feed_client = Arc::new(FeedClient::new(
        FeedClientConfig::from(&config.feed),
        feed_tx,
        shutdown_token.clone(),
    ));

    // Services
    let delivery: Arc<dyn Delivery> = hub.clone();
    let subscriptions = Arc::new(SubscriptionService::new(
        Arc::clone(&registry),
        Arc::new(feed_handle),
    ));
    let ingestor = TickIngestor::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&delivery),
    );
    let emitter = Arc::new(AggregationEmitter::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        delivery,
        Arc::clone(&clock),
        config.window.emit_interval,
    ));

    // Spawn feed event handler
    let handler_feed_state = Arc::clone(&feed_state);
    tokio::spawn(async move {
        handle_feed_events(feed_rx, ingestor, handler_feed_state).await;
    });

    // Spawn feed client
    let client_feed_state = Arc::clone(&feed_state);
    tokio::spawn(async move {
        if let Err(e) = feed_client.run(feed_commands).await {
            client_feed_state.set_error(e.to_string());
            tracing::error!(error = %e, "Feed client stopped");
        }
    });

    // Spawn OHLC emitter
    let emitter_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        emitter
            .run(emitter_cancel, |report| {
                metrics::record_emit_cycle(report.elapsed);
                metrics::record_delivery(MessageKind::Ohlc, &report.delivery);
            })
            .await;
    });

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_state),
        Arc::clone(&hub),
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn relay server
    let app_state = AppState {
        store,
        registry,
        subscriptions,
        hub,
        limiter,
        clock,
    };
    let relay_server = RelayServer::new(config.server.port, app_state, shutdown_token.clone());
    let relay_shutdown = shutdown_token.clone();
    let relay_task = tokio::spawn(async move {
        if let Err(e) = relay_server.run().await {
            tracing::error!(error = %e, "Relay server error");
            relay_shutdown.cancel();
        }
    });

    tracing::info!("Ticker relay ready");

    await_shutdown(shutdown_token).await;
    drain(vec![relay_task, health_task]).await;

    tracing::info!("Ticker relay stopped");
    Ok(())
}

/// Handle events from the upstream feed client.
async fn handle_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    ingestor: TickIngestor,
    feed_state: Arc<FeedState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected => {
                feed_state.set_state(ConnectionState::Connected);
                tracing::info!("Feed connected");
            }
            FeedEvent::Disconnected => {
                feed_state.set_state(ConnectionState::Disconnected);
                tracing::warn!("Feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                feed_state.set_reconnecting(attempt);
                metrics::record_feed_reconnect();
                tracing::info!(attempt, "Feed reconnecting");
            }
            FeedEvent::Tick(tick) => {
                feed_state.increment_ticks();
                metrics::record_tick_received();
                let report = ingestor.ingest(&tick);
                metrics::record_delivery(MessageKind::Price, &report);
            }
            FeedEvent::Subscribed(pair) => {
                tracing::debug!(pair = %pair, "Feed channel opened");
            }
            FeedEvent::Unsubscribed(pair) => {
                tracing::debug!(pair = %pair, "Feed channel closed");
            }
            FeedEvent::Error(msg) => {
                tracing::warn!(error = %msg, "Feed reported error");
                feed_state.record_error(msg);
            }
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        port = config.server.port,
        health_port = config.server.health_port,
        window_secs = config.window.window.as_secs(),
        emit_interval_secs = config.window.emit_interval.as_secs(),
        max_requests_per_ip = config.rate_limit.max_requests_per_ip,
        max_requests_per_user = config.rate_limit.max_requests_per_user,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed.url,
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        "Upstream feed"
    );
}

/// Wait for SIGTERM, SIGINT, or an internal cancellation.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

/// Wait for server tasks to finish, bounded by [`SHUTDOWN_TIMEOUT`].
async fn drain(tasks: Vec<JoinHandle<()>>) {
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        tracing::warn!("Shutdown timed out with tasks still running");
    }
}
