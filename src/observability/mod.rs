//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Retry loop, breaker gate, orchestrator produce:
//!     → tracing events (retries, trips, rejections, fallbacks)
//!     → metrics.rs (counters)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```

pub mod logging;
pub mod metrics;
