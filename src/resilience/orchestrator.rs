//! Composition of retry, circuit breaker and fallback around one operation.
//!
//! # Data Flow
//! ```text
//! execute(op):
//!     retry only      → RetryExecutor
//!     breaker only    → CircuitBreakerGate
//!     both            → RetryExecutor; on failure, one fresh call through CircuitBreakerGate
//!
//! execute_with_fallback(op, fallback):
//!     execute(op) → on any failure → fallback()
//! ```

use std::fmt;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreakerGate, CircuitBreakerOptions};
use crate::resilience::error::{ConfigurationError, ExecutionError, Transient, ValidationError};
use crate::resilience::retries::{RetryExecutor, RetryOptions};
use crate::resilience::state::StateStore;

/// Which behaviours wrap an execution. Built once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub retry: Option<RetryOptions>,
    pub circuit_breaker: Option<CircuitBreakerOptions>,
}

impl ExecutionPolicy {
    pub fn new(retry: Option<RetryOptions>, circuit_breaker: Option<CircuitBreakerOptions>) -> Self {
        Self {
            retry,
            circuit_breaker,
        }
    }

    /// Retry only.
    pub fn retry(options: RetryOptions) -> Self {
        Self::new(Some(options), None)
    }

    /// Circuit breaker only.
    pub fn circuit_breaker(options: CircuitBreakerOptions) -> Self {
        Self::new(None, Some(options))
    }

    pub fn with_retry(self, options: RetryOptions) -> Self {
        Self {
            retry: Some(options),
            ..self
        }
    }

    pub fn with_circuit_breaker(self, options: CircuitBreakerOptions) -> Self {
        Self {
            circuit_breaker: Some(options),
            ..self
        }
    }

    /// Check that at least one behaviour is configured and every value is in range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.retry.is_none() && self.circuit_breaker.is_none() {
            return Err(ConfigurationError::NothingConfigured);
        }

        let errors: Vec<ValidationError> = self
            .circuit_breaker
            .as_ref()
            .map(CircuitBreakerOptions::validate)
            .unwrap_or_default();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid(errors))
        }
    }
}

/// Runs operations under an `ExecutionPolicy`.
///
/// The state store is injected so that whoever assembles the orchestrator
/// decides which callers share breaker state.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    policy: ExecutionPolicy,
    store: StateStore,
    cancel: Option<CancellationToken>,
}

impl Orchestrator {
    pub fn new(policy: ExecutionPolicy, store: StateStore) -> Self {
        Self {
            policy,
            store,
            cancel: None,
        }
    }

    /// Abort retry backoff waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, ExecutionError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + fmt::Display,
    {
        self.policy.validate()?;

        let gate = self
            .policy
            .circuit_breaker
            .clone()
            .map(|options| CircuitBreakerGate::new(options, self.store.clone()));

        let Some(retry) = self.policy.retry.clone() else {
            return match gate {
                Some(gate) => gate.execute(op).await,
                None => Err(ConfigurationError::NothingConfigured.into()),
            };
        };

        let mut executor = RetryExecutor::new(retry);
        if let Some(token) = &self.cancel {
            executor = executor.with_cancellation(token.clone());
        }

        let retried = executor.execute(&mut op).await;
        match (retried, gate) {
            (Ok(value), _) => Ok(value),
            (Err(err), None) => Err(err),
            (Err(err @ ExecutionError::Cancelled { .. }), Some(_)) => Err(err),
            (Err(err), Some(gate)) => {
                tracing::debug!(
                    key = %gate.key(),
                    error = %ErrorSummary(&err),
                    "Retries failed, handing a fresh call to the circuit breaker"
                );
                gate.execute(op).await
            }
        }
    }

    /// Like `execute`, but runs `fallback` when the primary path fails for any
    /// reason. A failing fallback returns its own error unchanged.
    pub async fn execute_with_fallback<F, Fut, G, GFut, T, E>(
        &self,
        op: F,
        fallback: G,
    ) -> Result<T, ExecutionError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, E>>,
        E: Transient + fmt::Display,
    {
        match self.execute(op).await {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::debug!(error = %ErrorSummary(&err), "Primary path failed, using fallback");
                metrics::record_fallback();
                fallback().await.map_err(ExecutionError::Operation)
            }
        }
    }
}

/// Display adapter that does not require `E: Error`.
struct ErrorSummary<'a, E>(&'a ExecutionError<E>);

impl<E: fmt::Display> fmt::Display for ErrorSummary<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ExecutionError::Operation(err) => write!(f, "{err}"),
            ExecutionError::CircuitOpen(err) => write!(f, "{err}"),
            ExecutionError::Configuration(err) => write!(f, "{err}"),
            ExecutionError::Cancelled { attempts } => write!(f, "cancelled after {attempts} attempt(s)"),
        }
    }
}
