//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT → Shutdown::trigger()
//!
//! Shutdown (shutdown.rs):
//!     CancellationToken → child tokens handed to orchestrators
//!     → pending backoff waits return ExecutionError::Cancelled
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
