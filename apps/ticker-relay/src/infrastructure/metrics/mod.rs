//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format at `/metrics` on the health
//! server port.
//!
//! # Metrics Categories
//!
//! - **Feed**: ticks received, reconnect attempts
//! - **Delivery**: messages queued to clients by kind, failures by reason
//! - **Requests**: rate limit rejections by key kind
//! - **State**: connected clients, instruments being watched
//! - **Emitter**: OHLC cycle duration

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::DeliveryError;
use crate::application::services::DeliveryReport;
use crate::domain::rate_limit::LimitKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once and return its handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_relay_ticks_received_total",
        "Total trade ticks received from the upstream feed"
    );
    describe_counter!(
        "ticker_relay_feed_reconnects_total",
        "Total upstream feed reconnection attempts"
    );

    describe_counter!(
        "ticker_relay_messages_delivered_total",
        "Total messages queued to client connections"
    );
    describe_counter!(
        "ticker_relay_delivery_failures_total",
        "Total messages that could not be queued to a client"
    );

    describe_counter!(
        "ticker_relay_rate_limited_total",
        "Total HTTP requests rejected by the rate limiter"
    );

    describe_gauge!(
        "ticker_relay_client_connections",
        "Number of open client WebSocket connections"
    );
    describe_gauge!(
        "ticker_relay_watched_instruments",
        "Number of instruments with at least one subscriber"
    );

    describe_histogram!(
        "ticker_relay_emit_cycle_seconds",
        "Time spent on one OHLC emission cycle"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for outbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Per-tick price.
    Price,
    /// Periodic OHLC summary.
    Ohlc,
}

impl MessageKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Ohlc => "ohlc",
        }
    }
}

/// Record a tick received from the feed.
pub fn record_tick_received() {
    counter!("ticker_relay_ticks_received_total").increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_feed_reconnect() {
    counter!("ticker_relay_feed_reconnects_total").increment(1);
}

/// Record messages queued to clients.
pub fn record_messages_delivered(kind: MessageKind, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "ticker_relay_messages_delivered_total",
        "kind" => kind.as_str()
    )
    .increment(count as u64);
}

/// Record a failed delivery.
pub fn record_delivery_failure(kind: MessageKind, error: &DeliveryError) {
    counter!(
        "ticker_relay_delivery_failures_total",
        "kind" => kind.as_str(),
        "reason" => error.reason()
    )
    .increment(1);
}

/// Record the outcome of one fan-out.
pub fn record_delivery(kind: MessageKind, report: &DeliveryReport) {
    record_messages_delivered(kind, report.delivered);
    for failure in &report.failures {
        record_delivery_failure(kind, &failure.error);
    }
}

/// Record a rate limit rejection.
pub fn record_rate_limited(tripped: LimitKind) {
    counter!(
        "ticker_relay_rate_limited_total",
        "key" => tripped.as_str()
    )
    .increment(1);
}

/// Update the open client connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_client_connections(count: usize) {
    gauge!("ticker_relay_client_connections").set(count as f64);
}

/// Update the watched instrument count.
#[allow(clippy::cast_precision_loss)]
pub fn set_watched_instruments(count: usize) {
    gauge!("ticker_relay_watched_instruments").set(count as f64);
}

/// Record how long an emission cycle took.
pub fn record_emit_cycle(duration: Duration) {
    histogram!("ticker_relay_emit_cycle_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_as_str() {
        assert_eq!(MessageKind::Price.as_str(), "price");
        assert_eq!(MessageKind::Ohlc.as_str(), "ohlc");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_received();
        record_messages_delivered(MessageKind::Price, 3);
        record_delivery_failure(MessageKind::Ohlc, &DeliveryError::Backpressured);
        record_rate_limited(LimitKind::Ip);
        set_client_connections(2);
        record_emit_cycle(Duration::from_millis(5));
        record_delivery(MessageKind::Ohlc, &DeliveryReport::default());
    }
}
