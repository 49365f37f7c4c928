//! Metrics recording and Prometheus recorder setup.
//!
//! Every `record_*` function is safe to call before a recorder is installed;
//! the `metrics` facade discards values until then.

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use crate::observability_config::ObservabilityConfig;

/// Install the global Prometheus recorder
pub fn init_metrics_with_config(config: &ObservabilityConfig) -> Result<PrometheusHandle> {
    let mut builder = PrometheusBuilder::new();
    for (key, value) in config.get_tags() {
        builder = builder.add_global_label(key, value);
    }
    let handle = builder.install_recorder()?;

    tracing::info!(
        metrics_enabled = %config.enable_metrics_export,
        "Metrics collection initialized"
    );
    Ok(handle)
}

/// One finished OCR call (all presets of one image)
pub fn record_ocr_operation(success: bool, duration: Duration) {
    metrics::counter!("ocr_operations_total", "result" => if success { "success" } else { "failure" })
        .increment(1);
    metrics::histogram!("ocr_duration_seconds").record(duration.as_secs_f64());
}

/// Pool occupancy, published on every acquire and release
pub fn record_pool_state(workers: usize, available: usize, busy: usize, waiters: usize) {
    metrics::gauge!("pool_workers_total").set(workers as f64);
    metrics::gauge!("pool_workers_available").set(available as f64);
    metrics::gauge!("pool_workers_busy").set(busy as f64);
    metrics::gauge!("pool_waiters").set(waiters as f64);
}

pub fn record_classification(document_type: &'static str, confidence: f64) {
    metrics::counter!("documents_classified_total", "type" => document_type).increment(1);
    metrics::histogram!("classification_confidence").record(confidence);
}

pub fn record_field_extracted(field: &'static str) {
    metrics::counter!("fields_extracted_total", "field" => field).increment(1);
}

pub fn record_manual_review() {
    metrics::counter!("manual_review_total").increment(1);
}

pub fn record_persistence(result: &'static str) {
    metrics::counter!("persistence_operations_total", "result" => result).increment(1);
}

/// Whole-image pipeline outcome
pub fn record_document_processed(success: bool, duration: Duration) {
    metrics::counter!("documents_processed_total", "result" => if success { "success" } else { "failure" })
        .increment(1);
    metrics::histogram!("document_processing_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_segmentation(parts: usize) {
    metrics::histogram!("segmentation_parts").record(parts as f64);
}

pub fn record_health_check_metrics(check_type: &'static str, success: bool, duration: Duration) {
    metrics::counter!(
        "health_checks_total",
        "check" => check_type,
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
    metrics::histogram!("health_check_duration_seconds", "check" => check_type).record(duration.as_secs_f64());
}
