// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

// Macros for metrics when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_gauge!("mirror_up", "Mirror process liveness (1=up).");

    // Store
    describe_gauge!(
        "mirror_store_entities",
        "Number of entities held in the store, labeled by kind."
    );
    describe_gauge!(
        "mirror_readiness_status",
        "Readiness status (0=not_started, 1=in_progress, 2=done, 3=failed)."
    );
    describe_counter!(
        "mirror_store_patches_total",
        Unit::Count,
        "Field group patches applied to the store, labeled by kind and group."
    );

    // Interception
    describe_counter!(
        "mirror_interceptions_total",
        Unit::Count,
        "Top-level query fields seen by the store interceptor, labeled by outcome."
    );
    describe_counter!(
        "mirror_interceptor_errors_total",
        Unit::Count,
        "Interceptor hook failures that fell back to normal resolution, labeled by hook."
    );

    // Sync
    describe_histogram!(
        "mirror_sync_duration_seconds",
        "Duration of sync passes in seconds, labeled by task."
    );
    describe_counter!(
        "mirror_sync_failures_total",
        Unit::Count,
        "Upstream calls that exhausted their retries, labeled by operation."
    );
    describe_counter!(
        "mirror_refresh_skipped_total",
        Unit::Count,
        "Refresh runs skipped because the task lock was held elsewhere."
    );

    // Persistence
    describe_counter!(
        "mirror_checkpoint_writes_total",
        Unit::Count,
        "Checkpoint writes, labeled by result (written/discarded)."
    );

    // Invalidation
    describe_counter!(
        "mirror_invalidations_published_total",
        Unit::Count,
        "Cache keys published on the invalidation channel."
    );
}

/// Installs the Prometheus exporter on `listen_addr`.
#[cfg(feature = "observability")]
pub fn install_exporter(listen_addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus exporter: {}", e))?;
    describe_metrics();
    gauge!("mirror_up", 1.0);
    Ok(())
}

#[cfg(not(feature = "observability"))]
pub fn install_exporter(_listen_addr: std::net::SocketAddr) -> anyhow::Result<()> {
    Ok(())
}

pub fn set_store_size(kind: &str, size: f64) {
    gauge!("mirror_store_entities", size, "kind" => kind.to_string());
}

pub fn set_readiness(value: f64) {
    gauge!("mirror_readiness_status", value);
}

pub fn increment_store_patches(kind: &str, group: &str) {
    counter!("mirror_store_patches_total", 1, "kind" => kind.to_string(), "group" => group.to_string());
}

pub fn increment_interceptions(outcome: &'static str) {
    increment_counter!("mirror_interceptions_total", "outcome" => outcome);
}

pub fn increment_interceptor_errors(hook: &'static str) {
    increment_counter!("mirror_interceptor_errors_total", "hook" => hook);
}

pub fn record_sync_duration(task: &str, duration: std::time::Duration) {
    histogram!("mirror_sync_duration_seconds", duration.as_secs_f64(), "task" => task.to_string());
}

pub fn increment_sync_failures(operation: &str) {
    counter!("mirror_sync_failures_total", 1, "operation" => operation.to_string());
}

pub fn increment_refresh_skipped(task: &str) {
    counter!("mirror_refresh_skipped_total", 1, "task" => task.to_string());
}

pub fn increment_checkpoint_writes(result: &'static str) {
    increment_counter!("mirror_checkpoint_writes_total", "result" => result);
}

pub fn increment_invalidations(count: u64) {
    counter!("mirror_invalidations_published_total", count);
}
