//! Sliding-Window Request Limiter
//!
//! Keeps a log of request times per client IP and per user identifier and
//! rejects a request when either log shows more than its threshold of
//! requests inside the window.
//!
//! Logs are pruned lazily on the next request for the same key; there is no
//! background sweeper. Keys are independent, so each log sits in its own
//! `DashMap` shard entry and no cross-key lock is taken.
//!
//! Every [`SWEEP_EVERY`] checks the limiter also drops keys whose newest
//! request has left the window, so rotating IPs or user ids cannot grow the
//! maps without bound. A swept user counts as never seen.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

/// Checks between sweeps of idle keys.
pub const SWEEP_EVERY: u64 = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Thresholds and window for the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per IP inside one window.
    pub max_by_ip: usize,
    /// Requests allowed per user inside one window.
    pub max_by_user: usize,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_by_ip: 3,
            max_by_user: 5,
            window: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Which log caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Per-IP log.
    Ip,
    /// Per-user log.
    User,
}

impl LimitKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::User => "user",
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request may proceed.
    Accepted,
    /// The request exceeded a threshold.
    Rejected {
        /// The log that tripped first (IP is checked before user).
        tripped: LimitKind,
        /// Requests left in the IP log after pruning.
        ip_count: usize,
        /// Requests left in the user log after pruning.
        user_count: usize,
    },
}

impl RateDecision {
    /// Whether the request was accepted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

// =============================================================================
// Rate Log
// =============================================================================

#[derive(Debug, Default)]
struct RateLog {
    requests: VecDeque<DateTime<Utc>>,
}

impl RateLog {
    /// Whether the newest request is within `window` of the one `threshold`
    /// positions before it.
    fn exceeds(&self, threshold: usize, window: TimeDelta) -> bool {
        let len = self.requests.len();
        if len <= threshold {
            return false;
        }

        let newest = self.requests[len - 1];
        let compared = self.requests[len - 1 - threshold];
        newest - compared <= window
    }

    fn is_idle(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        self.requests.back().is_none_or(|&at| now - at > window)
    }

    fn prune(&mut self, reference: DateTime<Utc>, window: TimeDelta) {
        while self
            .requests
            .front()
            .is_some_and(|&at| reference - at > window)
        {
            self.requests.pop_front();
        }
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Per-IP and per-user sliding window limiter.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use ticker_relay::domain::rate_limit::{RateLimitConfig, RateLimiter};
///
/// let limiter = RateLimiter::new(RateLimitConfig::default());
/// let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
///
/// // Three requests from one IP are fine, the fourth is not.
/// for user in ["a", "b", "c"] {
///     assert!(limiter.check("10.0.0.1", user, now).is_accepted());
/// }
/// assert!(!limiter.check("10.0.0.1", "a", now).is_accepted());
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    max_by_ip: usize,
    max_by_user: usize,
    window: TimeDelta,
    by_ip: DashMap<String, RateLog>,
    by_user: DashMap<String, RateLog>,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max_by_ip: config.max_by_ip,
            max_by_user: config.max_by_user,
            window: TimeDelta::from_std(config.window).unwrap_or(TimeDelta::MAX),
            by_ip: DashMap::new(),
            by_user: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Record a request and decide whether it may proceed.
    ///
    /// The first request ever seen for a user identifier is accepted
    /// regardless of the IP log.
    pub fn check(&self, ip: &str, user: &str, now: DateTime<Utc>) -> RateDecision {
        // Sweep before taking entries; `retain` locks every shard.
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let evicted = self.evict_idle(now);
            if evicted > 0 {
                tracing::debug!(evicted, "Swept idle rate limit keys");
            }
        }

        // Lock order is always IP then user.
        let mut ip_log = self.by_ip.entry(ip.to_owned()).or_default();
        let mut user_log = self.by_user.entry(user.to_owned()).or_default();

        let first_for_user = user_log.requests.is_empty();

        ip_log.requests.push_back(now);
        user_log.requests.push_back(now);

        let tripped = if first_for_user {
            None
        } else if ip_log.exceeds(self.max_by_ip, self.window) {
            Some(LimitKind::Ip)
        } else if user_log.exceeds(self.max_by_user, self.window) {
            Some(LimitKind::User)
        } else {
            None
        };

        // Both logs are pruned against the newest IP request time.
        ip_log.prune(now, self.window);
        user_log.prune(now, self.window);

        match tripped {
            None => RateDecision::Accepted,
            Some(kind) => RateDecision::Rejected {
                tripped: kind,
                ip_count: ip_log.requests.len(),
                user_count: user_log.requests.len(),
            },
        }
    }

    /// Drop every key whose newest request is more than one window before
    /// `now`. Returns the number of keys removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.tracked_keys();
        self.by_ip.retain(|_, log| !log.is_idle(now, self.window));
        self.by_user.retain(|_, log| !log.is_idle(now, self.window));
        before.saturating_sub(self.tracked_keys())
    }

    /// IP and user keys currently held.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.by_ip.len() + self.by_user.len()
    }

    /// Requests currently held for an IP.
    #[must_use]
    pub fn ip_log_len(&self, ip: &str) -> usize {
        self.by_ip.get(ip).map_or(0, |log| log.requests.len())
    }

    /// Requests currently held for a user.
    #[must_use]
    pub fn user_log_len(&self, user: &str) -> usize {
        self.by_user.get(user).map_or(0, |log| log.requests.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
