//! Prometheus metrics for the metering gateway.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, histogram_opts, opts,
    register_histogram_vec, register_int_counter_vec,
};
use std::sync::OnceLock;

/// Store operation duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "gateway_db_query_duration_seconds",
            "Account store operation duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Metered units counter, by tier
static USAGE_UNITS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Overage report deliveries, by outcome
static OVERAGE_REPORTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing webhook events, by kind
static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup; safe to call again.
pub fn init_metrics() {
    USAGE_UNITS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "gateway_usage_units_total",
                "Metered usage units recorded, by tier"
            ),
            &["tier"]
        )
        .expect("Failed to register USAGE_UNITS_TOTAL")
    });

    OVERAGE_REPORTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "gateway_overage_reports_total",
                "Overage billing reports, by delivery outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register OVERAGE_REPORTS_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "gateway_webhook_events_total",
                "Billing provider webhook events, by kind"
            ),
            &["kind"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });
}

pub fn record_usage_unit(tier: &str) {
    if let Some(counter) = USAGE_UNITS_TOTAL.get() {
        counter.with_label_values(&[tier]).inc();
    }
}

pub fn record_overage_report(outcome: &str) {
    if let Some(counter) = OVERAGE_REPORTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_webhook_event(kind: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
}

/// Render all registered metrics in the Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
