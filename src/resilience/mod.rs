//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator::execute(op):
//!     → retries.rs (classify failure, back off, retry transient errors)
//!     → On retry failure: circuit_breaker.rs (fresh call, gated per key)
//!         → state.rs (shared keyed records + half-open probe gates)
//!     → On any failure with a fallback: fallback()
//! ```
//!
//! # Design Decisions
//! - The wrapped operation owns its own timeout; only backoff waits are ours
//! - Breaker state is injected, never a process-wide singleton
//! - Failures are data: `ErrorClass`, `ExecutionError`

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod orchestrator;
pub mod retries;
pub mod state;

pub use backoff::RetryPolicy;
pub use circuit_breaker::{CircuitBreakerGate, CircuitBreakerOptions};
pub use error::{
    classify, CapturedFailure, CircuitOpenError, ConfigurationError, ErrorClass, ExecutionError,
    Transient, TransientKind, ValidationError,
};
pub use orchestrator::{ExecutionPolicy, Orchestrator};
pub use retries::{RetryExecutor, RetryOptions};
pub use state::{CircuitBreakerRecord, CircuitBreakerState, StateStore};
