#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_wrap
    )
)]

//! Ticker Relay - Crypto Price Fan-out
//!
//! Keeps one connection to the Bitstamp live trades feed, opening a trade
//! channel only while some client is subscribed to that pair, and relays
//! prices to WebSocket clients. A rolling window per pair feeds a periodic
//! OHLC summary.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: In-memory state and message shapes
//!   - `window`: Rolling price windows and OHLC
//!   - `subscription`: Connection/instrument subscription registry
//!   - `rate_limit`: Per-IP and per-user sliding window limiter
//!   - `streaming`: Client wire messages
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Clock, client delivery, upstream channel control
//!   - `services`: Tick ingestion, OHLC emission, subscription handling
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bitstamp`: Upstream WebSocket client and codec
//!   - `broadcast`: Per-connection outbound queues
//!   - `server`: Client WebSocket and HTTP API
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐   price    ┌─────────────┐
//! Bitstamp WS ───► │ TickIngestor │ ─────────► │             │ ──► Client 1
//!                  └──────┬───────┘            │ OutboundHub │ ──► Client 2
//!                         ▼                    │             │ ──► Client N
//!                  ┌──────────────┐   ohlc     │             │
//!                  │ WindowStore  │ ─────────► │             │
//!                  └──────────────┘ (emitter)  └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - In-memory state with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::rate_limit::{LimitKind, RateDecision, RateLimitConfig, RateLimiter};
pub use domain::streaming::{
    ClientRequest, OhlcUpdate, OutboundMessage, PriceUpdate, RequestError,
};
pub use domain::subscription::{ConnectionId, SubscriptionChanges, SubscriptionRegistry};
pub use domain::window::{Instrument, NO_DATA_SENTINEL, Ohlc, OhlcSummary, Tick, WindowStore};

// Application services
pub use application::ports::{Clock, Delivery, ManualClock, SystemClock, UpstreamControl};
pub use application::services::{
    AggregationEmitter, DeliveryReport, EmitReport, SubscriptionService, TickIngestor,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedSettings, RateLimitSettings, RelayConfig, ServerSettings, WindowSettings,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::server::{AppState, RelayServer, ServerError};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::OutboundHub;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
