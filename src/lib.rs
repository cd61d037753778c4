//! Retry and circuit breaker execution for async operations.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ Orchestrator::execute(op)
//!                 │
//!                 ├─▶ RetryExecutor ──── backoff (linear / exponential)
//!                 │        │
//!                 │        └─ on failure
//!                 ▼
//!             CircuitBreakerGate ──▶ StateStore (per-key records + probe gates)
//!                 │
//!                 └─ on failure ──▶ fallback (optional)
//! ```

// Core subsystem
pub mod resilience;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::NinjaConfig;
pub use lifecycle::Shutdown;
pub use resilience::{
    classify, CapturedFailure, CircuitBreakerGate, CircuitBreakerOptions, CircuitBreakerRecord,
    CircuitBreakerState, CircuitOpenError, ConfigurationError, ErrorClass, ExecutionError,
    ExecutionPolicy, Orchestrator, RetryExecutor, RetryOptions, RetryPolicy, StateStore, Transient,
    TransientKind, ValidationError,
};
