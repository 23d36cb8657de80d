//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Backend REST client (feed, history, orders, GTT, portfolio).
pub mod backend;

/// Configuration loading.
pub mod config;

/// Metrics instrumentation.
pub mod metrics;

/// Server-Sent Events codec and transport.
pub mod sse;

/// Stream channel lifecycle and reconnect policy.
pub mod stream;

/// Tracing and OpenTelemetry setup for host applications.
pub mod telemetry;
