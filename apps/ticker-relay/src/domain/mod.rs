//! Domain Layer - Price windows, subscriptions and request limiting.
//!
//! Pure in-memory state with no I/O. Every operation takes the current time
//! as an argument so callers (and tests) control the clock.

/// Client-facing message shapes.
pub mod streaming;

/// Rolling per-instrument price windows with OHLC summaries.
pub mod window;

/// Connection-to-instrument subscription tracking.
pub mod subscription;

/// Sliding-window request rate limiting.
pub mod rate_limit;
