use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec, TextEncoder,
};

static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Admission decisions made against the store",
        &["algorithm", "outcome"]
    )
    .unwrap()
});

static STORE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_store_errors_total",
        "Failed store calls by kind",
        &["kind"]
    )
    .unwrap()
});

static SCRIPT_RELOADS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rate_limit_script_reloads_total",
        "Window scripts reloaded after the store lost its script cache"
    )
    .unwrap()
});

static BREAKER_OPEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rate_limit_breaker_open_total",
        "Times a limiter circuit breaker opened"
    )
    .unwrap()
});

static FAIL_OPEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rate_limit_fail_open_total",
        "Requests admitted without a store decision"
    )
    .unwrap()
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_decision(algorithm: &str, outcome: &str) {
        DECISIONS_TOTAL.with_label_values(&[algorithm, outcome]).inc();
    }

    pub fn record_store_error(kind: &str) {
        STORE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_script_reload() {
        SCRIPT_RELOADS_TOTAL.inc();
    }

    pub fn record_breaker_open() {
        BREAKER_OPEN_TOTAL.inc();
    }

    pub fn record_fail_open() {
        FAIL_OPEN_TOTAL.inc();
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}
