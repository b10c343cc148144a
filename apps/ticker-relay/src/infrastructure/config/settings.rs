//! Relay Configuration Settings
//!
//! Configuration types for the ticker relay, loaded from environment variables.
//! Unparsable values fall back to the default; zero windows and thresholds are
//! rejected.

use std::time::Duration;

use crate::domain::rate_limit::RateLimitConfig;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Client HTTP/WebSocket port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Outbound queue capacity per client connection.
    pub client_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3000,
            health_port: 8082,
            client_queue_capacity: 256,
        }
    }
}

/// Price window and emitter settings.
///
/// The two durations are related but configured separately.
#[derive(Debug, Clone)]
pub struct WindowSettings {
    /// Trailing span covered by each OHLC window.
    pub window: Duration,
    /// Period between OHLC emissions.
    pub emit_interval: Duration,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            emit_interval: Duration::from_secs(60),
        }
    }
}

/// Request rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Sliding window length.
    pub window: Duration,
    /// Requests allowed per IP inside the window.
    pub max_requests_per_ip: usize,
    /// Requests allowed per user inside the window.
    pub max_requests_per_user: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests_per_ip: 3,
            max_requests_per_user: 5,
        }
    }
}

impl RateLimitSettings {
    /// Limiter configuration for these settings.
    #[must_use]
    pub const fn limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_by_ip: self.max_requests_per_ip,
            max_by_user: self.max_requests_per_user,
            window: self.window,
        }
    }
}

/// Upstream feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Feed WebSocket URL.
    pub url: String,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "wss://ws.bitstamp.net".to_string(),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Price window settings.
    pub window: WindowSettings,
    /// Rate limiter settings.
    pub rate_limit: RateLimitSettings,
    /// Upstream feed settings.
    pub feed: FeedSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a window or threshold is configured as zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a window or threshold is configured as zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: env.parse("TICKER_RELAY_PORT", server_defaults.port),
            health_port: env.parse("TICKER_RELAY_HEALTH_PORT", server_defaults.health_port),
            client_queue_capacity: non_zero(
                "TICKER_RELAY_CLIENT_QUEUE_CAPACITY",
                env.parse(
                    "TICKER_RELAY_CLIENT_QUEUE_CAPACITY",
                    server_defaults.client_queue_capacity,
                ),
            )?,
        };

        let window_defaults = WindowSettings::default();
        let window = WindowSettings {
            window: non_zero_duration(
                "TICKER_RELAY_WINDOW_SECS",
                env.duration_secs("TICKER_RELAY_WINDOW_SECS", window_defaults.window),
            )?,
            emit_interval: non_zero_duration(
                "TICKER_RELAY_EMIT_INTERVAL_SECS",
                env.duration_secs(
                    "TICKER_RELAY_EMIT_INTERVAL_SECS",
                    window_defaults.emit_interval,
                ),
            )?,
        };

        let limit_defaults = RateLimitSettings::default();
        let rate_limit = RateLimitSettings {
            window: non_zero_duration(
                "TICKER_RELAY_RATE_LIMIT_WINDOW_SECS",
                env.duration_secs("TICKER_RELAY_RATE_LIMIT_WINDOW_SECS", limit_defaults.window),
            )?,
            max_requests_per_ip: non_zero(
                "TICKER_RELAY_MAX_REQUESTS_PER_IP",
                env.parse(
                    "TICKER_RELAY_MAX_REQUESTS_PER_IP",
                    limit_defaults.max_requests_per_ip,
                ),
            )?,
            max_requests_per_user: non_zero(
                "TICKER_RELAY_MAX_REQUESTS_PER_USER",
                env.parse(
                    "TICKER_RELAY_MAX_REQUESTS_PER_USER",
                    limit_defaults.max_requests_per_user,
                ),
            )?,
        };

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            url: env
                .get("TICKER_RELAY_FEED_URL")
                .filter(|url| !url.is_empty())
                .unwrap_or(feed_defaults.url),
            reconnect_delay_initial: env.duration_millis(
                "TICKER_RELAY_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "TICKER_RELAY_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "TICKER_RELAY_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "TICKER_RELAY_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
        };

        Ok(Self {
            server,
            window,
            rate_limit,
            feed,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value the relay cannot run with.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn non_zero(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn non_zero_duration(key: &str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "duration must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
