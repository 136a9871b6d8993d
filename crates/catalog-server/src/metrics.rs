//! Prometheus metrics for the catalog server.
//!
//! The query engine and the notifier record their own counters through the
//! `metrics` facade; this module installs the recorder, owns the HTTP-layer
//! metric names and renders the exposition text for `/metrics`.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Cache metrics
    pub const MICROCACHE_LOOKUPS_TOTAL: &str = "catalog_microcache_lookups_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "catalog_cache_invalidations_total";

    // Push metrics
    pub const WS_SESSIONS: &str = "catalog_ws_sessions";
    pub const STOCK_BROADCASTS_TOTAL: &str = "catalog_stock_broadcasts_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// HTTP Metrics
// =============================================================================

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };
    let normalized_path = normalize_path(path);

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => normalized_path.clone(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => normalized_path
    )
    .record(duration.as_secs_f64());
}

/// Collapse product ids so per-product routes share one label value.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["api", "products"] => "/api/products".into(),
        ["api", "products", "stock", "bulk"] => "/api/products/stock/bulk".into(),
        ["api", "products", _] => "/api/products/{id}".into(),
        ["api", "products", _, "images", _] => "/api/products/{id}/images/{index}".into(),
        ["api", "products", _, rest] => format!("/api/products/{{id}}/{rest}"),
        _ => path.to_string(),
    }
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_microcache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(names::MICROCACHE_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_cache_invalidation(reason: &'static str) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "reason" => reason).increment(1);
}

// =============================================================================
// Push Metrics
// =============================================================================

pub fn set_ws_sessions(count: usize) {
    gauge!(names::WS_SESSIONS).set(count as f64);
}

pub fn record_stock_broadcast(kind: &'static str) {
    counter!(names::STOCK_BROADCASTS_TOTAL, "kind" => kind).increment(1);
}
