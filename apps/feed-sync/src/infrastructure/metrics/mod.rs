//! Metrics Module
//!
//! Records sync-layer metrics through the `metrics` facade. The host process
//! decides where they go; [`init_metrics`] installs a Prometheus recorder for
//! hosts that want one.
//!
//! # Metrics Categories
//!
//! - **Channels**: connection state, reconnects and transport errors per channel
//! - **Merge**: fragments applied, decode failures and store sizes
//! - **Requests**: failed REST calls by endpoint
//! - **Subscriptions**: size of the local subscription set

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::channel::{ChannelKind, ConnectionState};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static DESCRIBED: OnceLock<()> = OnceLock::new();

/// Install a Prometheus recorder as the global metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another recorder was already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if [`init_metrics`] has not run.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

/// Register metric descriptions with the current recorder. Idempotent.
pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_gauge!(
            "feed_sync_channel_state",
            "Connection state per channel (0 idle, 1 connecting, 2 open, 3 degraded, 4 closed)"
        );
        describe_counter!(
            "feed_sync_reconnects_total",
            "Scheduled reconnection attempts per channel"
        );
        describe_counter!(
            "feed_sync_transport_errors_total",
            "Stream connection failures and drops by type"
        );

        describe_counter!(
            "feed_sync_fragments_applied_total",
            "Feed fragments merged into canonical stores"
        );
        describe_counter!(
            "feed_sync_decode_errors_total",
            "Pushed payloads dropped because they did not decode"
        );
        describe_gauge!(
            "feed_sync_store_records",
            "Canonical records held per channel"
        );
        describe_histogram!(
            "feed_sync_merge_seconds",
            "Time to merge one pushed event into its store"
        );

        describe_counter!(
            "feed_sync_request_failures_total",
            "Failed backend REST calls by endpoint"
        );
        describe_gauge!(
            "feed_sync_subscriptions",
            "Instruments in the local subscription set"
        );
    });
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a channel state transition.
pub fn set_channel_state(kind: ChannelKind, state: ConnectionState) {
    gauge!("feed_sync_channel_state", "channel" => kind.as_str()).set(state.as_gauge());
}

/// Record a scheduled reconnect.
pub fn record_reconnect(kind: ChannelKind) {
    counter!("feed_sync_reconnects_total", "channel" => kind.as_str()).increment(1);
}

/// Record a connection failure or drop.
pub fn record_transport_error(kind: ChannelKind, error_type: &'static str) {
    counter!(
        "feed_sync_transport_errors_total",
        "channel" => kind.as_str(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record fragments merged into a store.
pub fn record_fragments_applied(kind: ChannelKind, count: u64) {
    counter!("feed_sync_fragments_applied_total", "channel" => kind.as_str()).increment(count);
}

/// Record a dropped payload.
pub fn record_decode_error(kind: ChannelKind) {
    counter!("feed_sync_decode_errors_total", "channel" => kind.as_str()).increment(1);
}

/// Update the number of records in a store.
#[allow(clippy::cast_precision_loss)]
pub fn set_store_records(kind: ChannelKind, count: usize) {
    gauge!("feed_sync_store_records", "channel" => kind.as_str()).set(count as f64);
}

/// Record how long one event took to merge.
pub fn record_merge_duration(kind: ChannelKind, duration: Duration) {
    histogram!("feed_sync_merge_seconds", "channel" => kind.as_str())
        .record(duration.as_secs_f64());
}

/// Record a failed REST call.
pub fn record_request_failure(endpoint: &'static str) {
    counter!("feed_sync_request_failures_total", "endpoint" => endpoint).increment(1);
}

/// Update the local subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("feed_sync_subscriptions").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
