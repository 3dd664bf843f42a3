//! Prometheus metrics for the gateway and the signal pipeline.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the recorder. The signal server renders the
//! installed handle on `/metrics`; no separate listener is started.

use crate::signal::{Action, Channel};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

pub const GATEWAY_REQUESTS: &str = "dodohook_gateway_requests_total";
pub const GATEWAY_FORWARD_DURATION: &str = "dodohook_gateway_forward_duration_seconds";
pub const SIGNALS_RECEIVED: &str = "dodohook_signals_received_total";
pub const SIGNALS_PROCESSED: &str = "dodohook_signals_processed_total";
pub const DISPATCH_LATENCY: &str = "dodohook_dispatch_latency_seconds";

static INIT: Once = Once::new();
static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Idempotent.
pub fn init_metrics() {
    INIT.call_once(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_err() {
                warn!("prometheus handle was already stored");
            }
            describe();
            info!("prometheus recorder installed");
        }
        Err(e) => warn!(error = %e, "failed to install prometheus recorder"),
    });
}

/// Handle for in-process rendering, once [`init_metrics`] has succeeded.
pub fn handle() -> Option<&'static PrometheusHandle> {
    HANDLE.get()
}

fn describe() {
    ::metrics::describe_counter!(GATEWAY_REQUESTS, "Relay requests seen by the gateway, by outcome");
    ::metrics::describe_histogram!(
        GATEWAY_FORWARD_DURATION,
        ::metrics::Unit::Seconds,
        "Time spent relaying to the local target"
    );
    ::metrics::describe_counter!(SIGNALS_RECEIVED, "Valid signals received, by action");
    ::metrics::describe_counter!(SIGNALS_PROCESSED, "Signals processed, by final status");
    ::metrics::describe_histogram!(
        DISPATCH_LATENCY,
        ::metrics::Unit::Seconds,
        "Latency of the delivering channel"
    );
}

/// `outcome` is one of `forwarded`, `unauthorized`, `rate_limited`,
/// `overloaded`, `timeout`, `unreachable` or `error`.
pub fn record_gateway_request(outcome: &'static str) {
    ::metrics::counter!(GATEWAY_REQUESTS, "outcome" => outcome).increment(1);
}

pub fn record_forward_duration(secs: f64) {
    ::metrics::histogram!(GATEWAY_FORWARD_DURATION).record(secs);
}

pub fn record_signal_received(action: Action) {
    ::metrics::counter!(SIGNALS_RECEIVED, "action" => action.as_str()).increment(1);
}

/// `status` is `delivered`, `rejected` or `failed`.
pub fn record_signal_processed(status: &'static str) {
    ::metrics::counter!(SIGNALS_PROCESSED, "status" => status).increment(1);
}

pub fn record_dispatch(channel: Channel, secs: f64) {
    ::metrics::histogram!(DISPATCH_LATENCY, "channel" => channel.as_str()).record(secs);
}
