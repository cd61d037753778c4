//! Circuit breaker gate for one key.
//!
//! # State Transitions
//! ```text
//! Closed → Open: exception_attempts >= exception_threshold
//! Open → Half-Open: break duration elapsed and the probe gate was acquired
//! Half-Open → Closed: success_attempts >= success_threshold (record deleted)
//! Half-Open → Open: probe fails
//! ```
//!
//! # Design Decisions
//! - State lives in the injected `StateStore`, not in the gate
//! - Fail fast in Open state; the operation is never invoked
//! - Single probe at a time per key, enforced by the store's shared gate
//! - Every failure counts, transient or not

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::error::{CapturedFailure, CircuitOpenError, ExecutionError, ValidationError};
use crate::resilience::state::{CircuitBreakerRecord, CircuitBreakerState, ProbeOutcome, StateStore};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CircuitBreakerOptions {
    /// Identity of the protected operation in the state store.
    pub key: String,
    /// Failures needed to trip the breaker.
    pub exception_threshold: u32,
    /// Successful half-open probes needed to close it again.
    pub success_threshold: u32,
    /// How long the breaker stays open before a probe is allowed.
    pub break_duration: Duration,
}

impl CircuitBreakerOptions {
    pub fn new(
        key: impl Into<String>,
        exception_threshold: u32,
        success_threshold: u32,
        break_duration: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            exception_threshold,
            success_threshold,
            break_duration,
        }
    }

    /// Check value ranges, returning every problem found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.key.trim().is_empty() {
            errors.push(ValidationError::new("circuit_breaker.key", "must not be empty"));
        }
        if self.exception_threshold == 0 {
            errors.push(ValidationError::new(
                "circuit_breaker.exception_threshold",
                "must be at least 1",
            ));
        }
        if self.success_threshold == 0 {
            errors.push(ValidationError::new(
                "circuit_breaker.success_threshold",
                "must be at least 1",
            ));
        }
        errors
    }
}

/// Applies the breaker state machine for one key against a shared store.
#[derive(Debug, Clone)]
pub struct CircuitBreakerGate {
    options: CircuitBreakerOptions,
    store: StateStore,
}

impl CircuitBreakerGate {
    pub fn new(options: CircuitBreakerOptions, store: StateStore) -> Self {
        Self { options, store }
    }

    pub fn options(&self) -> &CircuitBreakerOptions {
        &self.options
    }

    pub fn key(&self) -> &str {
        &self.options.key
    }

    /// Current record for this gate's key.
    pub fn record(&self) -> CircuitBreakerRecord {
        self.store.get(self.key())
    }

    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, ExecutionError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let record = self.store.get(self.key());
        if record.is_closed() {
            return self.call_closed(op).await;
        }

        let now = Instant::now();
        if !record.break_elapsed(self.options.break_duration, now) {
            let remaining = record.remaining_break(self.options.break_duration, now);
            return Err(self.reject(record, &format!("retry in {remaining:?}")).into());
        }

        let Some(permit) = self.store.try_acquire_probe(self.key()) else {
            return Err(self.reject(record, "another caller is probing").into());
        };

        // Another prober may have closed or re-tripped the breaker while we
        // were acquiring the gate.
        let record = self.store.get(self.key());
        let now = Instant::now();
        if record.is_closed() {
            self.store.release_probe(permit);
            return self.call_closed(op).await;
        }
        if !record.break_elapsed(self.options.break_duration, now) {
            return Err(self.reject(record, "probe already in progress").into());
        }

        if self.store.begin_half_open(self.key(), now) {
            tracing::info!(key = %self.key(), "Circuit breaker half-open, probing");
            metrics::record_circuit_transition(self.key(), CircuitBreakerState::HalfOpen);
        }

        let result = op().await;
        metrics::record_attempt(result.is_ok());
        let result = match result {
            Ok(value) => {
                self.on_probe_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure(&err);
                Err(ExecutionError::Operation(err))
            }
        };
        self.store.release_probe(permit);
        result
    }

    async fn call_closed<F, Fut, T, E>(&self, op: F) -> Result<T, ExecutionError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let result = op().await;
        metrics::record_attempt(result.is_ok());
        result.map_err(|err| {
            self.on_failure(&err);
            ExecutionError::Operation(err)
        })
    }

    fn on_failure<E: fmt::Display>(&self, err: &E) {
        let outcome = self.store.record_failure(
            self.key(),
            self.options.exception_threshold,
            CapturedFailure::capture(err),
            Instant::now(),
        );

        if outcome.tripped && outcome.previous_state != CircuitBreakerState::Open {
            tracing::warn!(
                key = %self.key(),
                from = outcome.previous_state.as_str(),
                exception_attempts = outcome.exception_attempts,
                error = %err,
                "Circuit breaker tripped open"
            );
            metrics::record_circuit_transition(self.key(), CircuitBreakerState::Open);
        } else {
            tracing::debug!(
                key = %self.key(),
                exception_attempts = outcome.exception_attempts,
                threshold = self.options.exception_threshold,
                "Circuit breaker recorded failure"
            );
        }
    }

    fn on_probe_success(&self) {
        match self
            .store
            .record_probe_success(self.key(), self.options.success_threshold)
        {
            ProbeOutcome::Closed => {
                tracing::info!(key = %self.key(), "Circuit breaker closed");
                metrics::record_circuit_transition(self.key(), CircuitBreakerState::Closed);
            }
            ProbeOutcome::Pending { success_attempts } => {
                tracing::debug!(
                    key = %self.key(),
                    success_attempts,
                    threshold = self.options.success_threshold,
                    "Half-open probe succeeded"
                );
            }
            ProbeOutcome::Missing => {}
        }
    }

    fn reject(&self, record: CircuitBreakerRecord, reason: &str) -> CircuitOpenError {
        tracing::warn!(key = %self.key(), state = record.state.as_str(), reason, "Circuit breaker rejected call");
        metrics::record_circuit_rejection(self.key());
        CircuitOpenError {
            key: self.key().to_string(),
            message: reason.to_string(),
            cause: record.last_error,
        }
    }
}
