//! Feed Reconnection Backoff
//!
//! Exponential backoff with symmetric jitter for the upstream feed
//! connection. The delay for attempt `n` (1-based) is
//! `initial * multiplier^(n-1)`, capped at `max`, then jittered.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::FeedSettings;

/// Jitter applied to every delay, as a fraction of the base delay.
const DEFAULT_JITTER: f64 = 0.1;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay before jitter.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Jitter as a fraction of the base delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&FeedSettings::default())
    }
}

impl From<&FeedSettings> for ReconnectConfig {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: DEFAULT_JITTER,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

impl ReconnectConfig {
    /// Base delay for a 1-based attempt number, before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let secs = self.initial_delay.as_secs_f64() * factor;

        if secs.is_finite() && secs < max_secs {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }
}

/// Stateful backoff tracker for one connection.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ticker_relay::infrastructure::bitstamp::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     jitter_factor: 0.0,
///     ..ReconnectConfig::default()
/// });
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no attempts made.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Register an attempt and return how long to wait before it.
    ///
    /// Returns `None` once the attempt limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        Some(self.jittered(self.config.base_delay(self.attempts)))
    }

    /// Forget previous attempts after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = base.as_secs_f64() * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test_case(1 => 100 ; "first attempt uses initial delay")]
    #[test_case(2 => 200 ; "second attempt doubles")]
    #[test_case(4 => 800 ; "fourth attempt")]
    #[test_case(5 => 1000 ; "capped at max")]
    #[test_case(60 => 1000 ; "large attempt stays capped")]
    fn base_delay_grows_then_caps(attempt: u32) -> u128 {
        config(0).base_delay(attempt).as_millis()
    }

    #[test]
    fn defaults_follow_feed_settings() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn attempt_limit_is_enforced() {
        let mut policy = ReconnectPolicy::new(config(2));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut cfg = config(0);
        cfg.initial_delay = Duration::from_secs(1);
        cfg.max_delay = Duration::from_secs(10);
        cfg.jitter_factor = 0.1;

        for _ in 0..100 {
            let delay = ReconnectPolicy::new(cfg.clone()).next_delay().unwrap();
            let millis = delay.as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of band");
        }
    }

    #[test]
    fn unlimited_attempts_never_stop() {
        let mut policy = ReconnectPolicy::new(config(0));
        for _ in 0..500 {
            assert!(policy.next_delay().is_some());
        }
        assert_eq!(policy.attempt_count(), 500);
    }
}
