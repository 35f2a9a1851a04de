//! Prometheus metrics for the smart account relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Operation lifecycle
    pub static ref OPERATIONS_PREPARED: CounterVec = register_counter_vec!(
        "relayer_operations_prepared_total",
        "Total number of operations prepared",
        &["kind"]
    ).unwrap();

    pub static ref OPERATIONS_EXECUTED: CounterVec = register_counter_vec!(
        "relayer_operations_executed_total",
        "Total number of operations reaching a terminal state",
        &["kind", "status"]
    ).unwrap();

    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_execution_latency_seconds",
        "Time from claiming an operation to its terminal state",
        &["kind"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Rejections
    pub static ref RATE_LIMITED: CounterVec = register_counter_vec!(
        "relayer_rate_limited_total",
        "Total number of requests denied by the rate limiter",
        &["class"]
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of failed requests by error code",
        &["operation", "code"]
    ).unwrap();

    pub static ref STORE_SWEPT: GaugeVec = register_gauge_vec!(
        "relayer_store_swept_last",
        "Entries removed by the most recent store sweep",
        &["store"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();
}

/// Record a prepared operation
pub fn record_prepared(kind: &str) {
    OPERATIONS_PREPARED.with_label_values(&[kind]).inc();
}

/// Record a terminal execution outcome and its latency
pub fn record_executed(kind: &str, success: bool, seconds: f64) {
    let status = if success { "success" } else { "failure" };
    OPERATIONS_EXECUTED.with_label_values(&[kind, status]).inc();
    EXECUTION_LATENCY.with_label_values(&[kind]).observe(seconds);
}

/// Record a rate limiter denial
pub fn record_rate_limited(class: &str) {
    RATE_LIMITED.with_label_values(&[class]).inc();
}

/// Record a failed request
pub fn record_error(operation: &str, code: &str) {
    ERRORS.with_label_values(&[operation, code]).inc();
}

pub fn record_sweep(store: &str, removed: u64) {
    STORE_SWEPT.with_label_values(&[store]).set(removed as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_executed_counts_by_status() {
        let before = OPERATIONS_EXECUTED
            .with_label_values(&["transfer", "success"])
            .get();
        record_executed("transfer", true, 0.25);
        let after = OPERATIONS_EXECUTED
            .with_label_values(&["transfer", "success"])
            .get();
        assert!(after >= before + 1.0);
    }

    #[test]
    fn test_metrics_gathered() {
        record_prepared("swap");
        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"relayer_operations_prepared_total".to_string()));
    }
}
