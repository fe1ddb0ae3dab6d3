//! Metric names and recording helpers

use std::time::Instant;

use opentelemetry::metrics::{Histogram, Meter};

/// Meter shared by every gateway instrument
pub fn meter() -> Meter {
    opentelemetry::global::meter("switchyard")
}

/// Record a duration measurement on a histogram
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[opentelemetry::KeyValue]) {
    histogram.record(start.elapsed().as_secs_f64(), attributes);
}

// Exchange metric names
pub const EXCHANGE_DURATION: &str = "switchyard.exchange.duration";
pub const EXCHANGE_COUNT: &str = "switchyard.exchange.count";

// Pool metric names
pub const CREDENTIAL_SWITCH_COUNT: &str = "switchyard.pool.credential_switch.count";
pub const CREDENTIAL_REFRESH_COUNT: &str = "switchyard.pool.refresh.count";
