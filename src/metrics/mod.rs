//! Metrics module
//!
//! Prometheus counters and histograms for uploads and their attempts.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "verity_uploads_total",
        "Total number of uploads by final status",
        &["status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "verity_upload_bytes_total",
        "Total bytes stored by successful uploads"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "verity_upload_duration_seconds",
        "Upload duration in seconds, retries and backoff included",
        &["status"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 180.0, 300.0, 600.0]
    ).unwrap();

    pub static ref UPLOAD_FAILURES: CounterVec = register_counter_vec!(
        "verity_upload_failures_total",
        "Failed uploads by failure kind",
        &["kind"]
    ).unwrap();

    // Attempt metrics
    pub static ref ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "verity_upload_attempts_total",
        "Transfer attempts by outcome",
        &["outcome"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(bytes: u64, duration_secs: f64) {
    UPLOADS_TOTAL.with_label_values(&["success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    UPLOAD_DURATION
        .with_label_values(&["success"])
        .observe(duration_secs);
}

/// Record a failed upload
pub fn record_upload_failure(kind: &str, duration_secs: f64) {
    UPLOADS_TOTAL.with_label_values(&["failure"]).inc();
    UPLOAD_FAILURES.with_label_values(&[kind]).inc();
    UPLOAD_DURATION
        .with_label_values(&["failure"])
        .observe(duration_secs);
}

/// Record one settled transfer attempt
pub fn record_attempt(outcome: &str) {
    ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Render every registered metric in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
