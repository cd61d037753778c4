//! Shared utilities for integration tests.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ninja_resilience::{Transient, TransientKind};
use thiserror::Error;

/// Error produced by scripted operations. The number is the attempt that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestError {
    #[error("transient failure on attempt {0}")]
    Transient(u32),

    #[error("fatal failure on attempt {0}")]
    Fatal(u32),
}

impl Transient for TestError {
    fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            TestError::Transient(_) => Some(TransientKind::ConnectionClosed),
            TestError::Fatal(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Succeed,
    AlwaysTransient,
    AlwaysFatal,
    TransientTimes(u32),
}

/// An operation with a scripted outcome and a shared invocation counter.
#[derive(Debug, Clone)]
pub struct ScriptedOperation {
    calls: Arc<AtomicU32>,
    behaviour: Behaviour,
    latency: Duration,
}

#[allow(dead_code)]
impl ScriptedOperation {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            behaviour,
            latency: Duration::ZERO,
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Behaviour::Succeed)
    }

    pub fn always_transient() -> Self {
        Self::new(Behaviour::AlwaysTransient)
    }

    pub fn always_fatal() -> Self {
        Self::new(Behaviour::AlwaysFatal)
    }

    /// Fails transiently `n` times, then succeeds.
    pub fn transient_times(n: u32) -> Self {
        Self::new(Behaviour::TransientTimes(n))
    }

    /// Sleep for `latency` inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of times the operation has been invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Invoke the operation. Successful calls return the attempt number.
    pub fn call(&self) -> impl Future<Output = Result<u32, TestError>> + Send + 'static {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behaviour = self.behaviour;
        let latency = self.latency;

        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            match behaviour {
                Behaviour::Succeed => Ok(attempt),
                Behaviour::AlwaysTransient => Err(TestError::Transient(attempt)),
                Behaviour::AlwaysFatal => Err(TestError::Fatal(attempt)),
                Behaviour::TransientTimes(n) if attempt <= n => Err(TestError::Transient(attempt)),
                Behaviour::TransientTimes(_) => Ok(attempt),
            }
        }
    }
}
