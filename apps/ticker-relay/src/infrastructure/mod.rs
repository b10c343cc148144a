//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the servers and
//! ambient plumbing the binary wires together.

/// Bitstamp live-trades WebSocket client.
pub mod bitstamp;

/// Per-connection outbound queues.
pub mod broadcast;

/// Environment-driven configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Client-facing WebSocket and HTTP server.
pub mod server;

/// OpenTelemetry tracing integration.
pub mod telemetry;
