// src/metrics.rs
// Prometheus metrics for the hub gateway (§4.8 operational surface: the
// gateway exposes its own health, separate from the plugin/client protocol).
//
// Grounded on the teacher's `metrics/mod.rs` (same `PrometheusBuilder` +
// `OnceLock<PrometheusHandle>` shape, same counter/gauge naming style).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static ACTIVE_PLUGIN_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CLIENT_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    PROMETHEUS_HANDLE.set(handle).expect("Prometheus handle already initialized");
    info!("Prometheus metrics initialized");
}

/// `GET /metrics`.
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized".to_string()),
    }
}

pub fn plugin_connected() {
    let count = ACTIVE_PLUGIN_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("hub_plugin_connections").set(count as f64);
    counter!("hub_plugin_connects_total").increment(1);
}

pub fn plugin_disconnected() {
    let count = ACTIVE_PLUGIN_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!("hub_plugin_connections").set(count as f64);
}

pub fn client_connected() {
    let count = ACTIVE_CLIENT_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("hub_client_connections").set(count as f64);
    counter!("hub_client_connects_total").increment(1);
}

pub fn client_disconnected() {
    let count = ACTIVE_CLIENT_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!("hub_client_connections").set(count as f64);
}

pub fn message_persisted(sender: &str) {
    counter!("hub_messages_total", "sender" => sender.to_string()).increment(1);
}

pub fn job_terminal(status: &str) {
    counter!("hub_jobs_terminal_total", "status" => status.to_string()).increment(1);
}

pub fn auth_rejected(reason: &str) {
    counter!("hub_auth_rejections_total", "reason" => reason.to_string()).increment(1);
}
