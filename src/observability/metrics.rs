//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ninja_attempts_total` (counter): operation invocations by outcome
//! - `ninja_retries_total` (counter): backoff waits by policy
//! - `ninja_circuit_transitions_total` (counter): breaker transitions by key, state
//! - `ninja_circuit_rejections_total` (counter): fail-fast rejections by key
//! - `ninja_fallbacks_total` (counter): fallback invocations
//!
//! # Design Decisions
//! - Library code only records through the `metrics` facade
//! - The Prometheus exporter is installed by the binary, never by the library

use std::net::SocketAddr;

use crate::resilience::state::CircuitBreakerState;

/// Install the Prometheus exporter with an HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one invocation of the wrapped operation.
pub fn record_attempt(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("ninja_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a backoff wait before a retry.
pub fn record_retry(policy: &'static str) {
    metrics::counter!("ninja_retries_total", "policy" => policy).increment(1);
}

/// Record a circuit breaker state transition.
pub fn record_circuit_transition(key: &str, state: CircuitBreakerState) {
    metrics::counter!(
        "ninja_circuit_transitions_total",
        "key" => key.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

/// Record a call rejected by an open circuit.
pub fn record_circuit_rejection(key: &str) {
    metrics::counter!("ninja_circuit_rejections_total", "key" => key.to_string()).increment(1);
}

pub fn record_fallback() {
    metrics::counter!("ninja_fallbacks_total").increment(1);
}
