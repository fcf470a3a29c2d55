use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Metric name prefix for all workload management metrics
const PREFIX: &str = "wms";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref STATUS_UPDATES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_status_updates_total"), "Per-job status update outcomes"),
        &["outcome"]
    ).expect("Failed to create status_updates_total metric");

    pub static ref RESCHEDULES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_reschedules_total"), "Per-job reschedule outcomes"),
        &["outcome"]
    ).expect("Failed to create reschedules_total metric");

    pub static ref TASK_QUEUE_CLEANUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_task_queue_cleanups_total"),
            "Deferred empty task queue checks"
        ),
        &["result"]
    ).expect("Failed to create task_queue_cleanups_total metric");

    pub static ref BULK_OPERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_bulk_operation_duration_seconds"),
            "Duration of bulk operations in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["operation"]
    ).expect("Failed to create bulk_operation_duration_seconds metric");
}

/// Register all metrics with the registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(STATUS_UPDATES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RESCHEDULES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_QUEUE_CLEANUPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BULK_OPERATION_DURATION_SECONDS.clone()));

    tracing::debug!("Metrics registered");
}

pub fn record_status_updates(succeeded: usize, failed: usize) {
    STATUS_UPDATES_TOTAL
        .with_label_values(&["success"])
        .inc_by(succeeded as f64);
    STATUS_UPDATES_TOTAL
        .with_label_values(&["failure"])
        .inc_by(failed as f64);
}

pub fn record_reschedules(succeeded: usize, failed: usize) {
    RESCHEDULES_TOTAL
        .with_label_values(&["success"])
        .inc_by(succeeded as f64);
    RESCHEDULES_TOTAL
        .with_label_values(&["failure"])
        .inc_by(failed as f64);
}

/// `result` is one of `deleted`, `kept` or `error`
pub fn record_task_queue_cleanup(result: &str) {
    TASK_QUEUE_CLEANUPS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_bulk_operation(operation: &str, duration: Duration) {
    BULK_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Render every registered metric in the text exposition format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_encode_includes_recorded_series() {
        init_metrics();
        record_reschedules(1, 2);
        record_task_queue_cleanup("deleted");
        record_bulk_operation("reschedule", Duration::from_millis(3));

        let text = encode_metrics().unwrap();
        assert!(text.contains("wms_reschedules_total"));
        assert!(text.contains("outcome=\"failure\""));
        assert!(text.contains("wms_task_queue_cleanups_total"));
        assert!(text.contains("wms_bulk_operation_duration_seconds"));
    }
}
