//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, RateLimitSettings, RelayConfig, ServerSettings, WindowSettings,
};
