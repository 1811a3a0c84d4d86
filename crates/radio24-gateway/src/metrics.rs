//! Prometheus metrics recording and endpoint.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder on first use and return the render handle.
/// `None` when another recorder already owns the process.
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%e, "Failed to install Prometheus recorder");
                None
            }
        })
        .clone()
}

pub fn set_listeners(count: usize) {
    metrics::gauge!("radio24_listeners").set(count as f64);
}

pub fn record_broadcast() {
    metrics::counter!("radio24_broadcasts_total").increment(1);
}

pub fn record_broadcast_dropped() {
    metrics::counter!("radio24_broadcasts_dropped_total").increment(1);
}

pub fn record_evictions(count: usize) {
    metrics::counter!("radio24_listener_evictions_total").increment(count as u64);
}
