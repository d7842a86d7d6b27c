//! Prometheus metrics for the StarkBridge relayer
//!
//! Registered in the default registry; [`encode_metrics`] renders the text
//! exposition format.

use eyre::{Result, WrapErr};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Encoder, Gauge,
    IntCounter, TextEncoder,
};

lazy_static! {
    pub static ref MESSAGES_OBSERVED: CounterVec = register_counter_vec!(
        "starkbridge_messages_observed_total",
        "Total number of messages observed in an outbox",
        &["direction"]
    ).unwrap();

    pub static ref MESSAGES_SETTLED: CounterVec = register_counter_vec!(
        "starkbridge_messages_settled_total",
        "Total number of messages consumed on their destination",
        &["direction", "kind"]
    ).unwrap();

    pub static ref DUPLICATES_SKIPPED: CounterVec = register_counter_vec!(
        "starkbridge_duplicates_skipped_total",
        "Messages skipped because they were already consumed",
        &["direction"]
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "starkbridge_errors_total",
        "Total number of failed consume attempts",
        &["direction", "class"]
    ).unwrap();

    pub static ref DEAD_LETTERS: IntCounter = register_int_counter!(
        "starkbridge_dead_letters_total",
        "Messages abandoned after exhausting retries"
    ).unwrap();

    pub static ref DEFERRED: Gauge = register_gauge!(
        "starkbridge_deferred_messages",
        "Messages waiting for a retry on the next poll"
    ).unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "starkbridge_relayer_up",
        "Whether the relayer loop is running"
    ).unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .wrap_err("Failed to encode metrics")?;
    String::from_utf8(buffer).wrap_err("Metrics output is not UTF-8")
}
