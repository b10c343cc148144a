//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters that implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Delivery`: push a message to one client connection
//! - `UpstreamControl`: open/close instrument channels on the feed
//!
//! ## Ambient
//!
//! - `Clock`: current wall-clock time, swappable in tests

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::streaming::OutboundMessage;
use crate::domain::subscription::{ConnectionId, SubscriptionChanges};

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move forward by `secs` seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock();
        *now += chrono::TimeDelta::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Why a message did not reach a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection has gone away.
    #[error("connection closed")]
    Closed,
    /// The connection's outbound queue is full.
    #[error("connection backpressured")]
    Backpressured,
    /// No such connection is registered.
    #[error("unknown connection")]
    UnknownConnection,
    /// The message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl DeliveryError {
    /// Reason label for logs and metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Backpressured => "full",
            Self::UnknownConnection => "unknown",
            Self::Encode(_) => "encode",
        }
    }
}

/// Pushes messages to individual client connections.
///
/// Implementations must not block: a slow or dead connection fails on its
/// own without holding up deliveries to others.
#[cfg_attr(test, mockall::automock)]
pub trait Delivery: Send + Sync {
    /// Queue a message for one connection.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the message cannot be queued.
    fn deliver(
        &self,
        connection: ConnectionId,
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError>;
}

// =============================================================================
// Upstream Control
// =============================================================================

/// Opens and closes instrument channels on the upstream feed.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamControl: Send + Sync {
    /// Forward subscription changes upstream. Empty changes are ignored.
    ///
    /// Called while the subscription registry is write-locked, so it must
    /// queue the change and return without blocking.
    fn apply(&self, changes: &SubscriptionChanges);
}
