//! Upstream feed status shared with the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Connection state of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Connected and relaying.
    Connected,
    /// Waiting to reconnect.
    Reconnecting,
    /// Gave up or hit a fatal error.
    Error,
}

impl ConnectionState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

/// Tracks the state of the upstream feed connection.
#[derive(Debug)]
pub struct FeedState {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    ticks_received: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Create a disconnected feed state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            ticks_received: AtomicU64::new(0),
        }
    }

    /// Set the connection state. Connecting clears attempts and the last error.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record a reconnect attempt.
    pub fn set_reconnecting(&self, attempt: u32) {
        *self.state.write() = ConnectionState::Reconnecting;
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Record an error reported by the feed without changing the state.
    pub fn record_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Mark the feed as failed.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Error;
        *self.last_error.write() = Some(message);
    }

    /// Count a received tick.
    pub fn increment_ticks(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`FeedState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Last successful connection time.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error reported.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Ticks received since start.
    pub ticks_received: u64,
}
