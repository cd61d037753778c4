//! Resilient currency conversion demo.
//!
//! Drives a simulated exchange-rate source through the orchestrator so the
//! retry and circuit breaker behaviour can be watched from the command line.
//!
//! ```text
//! ninja-resilience --failures 2                # transient failures, retried
//! ninja-resilience --fatal --fallback 0.9      # non-transient, fallback used
//! ninja-resilience --config ninja.toml --calls 10 --failures 100 --report
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use thiserror::Error;

use ninja_resilience::config::{load_config, CircuitBreakerConfig, NinjaConfig, RetryConfig};
use ninja_resilience::lifecycle::{signals, Shutdown};
use ninja_resilience::observability::{logging, metrics};
use ninja_resilience::{Orchestrator, RetryPolicy, StateStore, Transient, TransientKind};

#[derive(Parser)]
#[command(name = "ninja-resilience")]
#[command(about = "Retry and circuit breaker demo against a simulated rate source", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 1000.0)]
    amount: f64,

    #[arg(long, default_value = "USD")]
    from: String,

    #[arg(long, default_value = "EUR")]
    to: String,

    /// Number of conversions to run.
    #[arg(long, default_value_t = 1)]
    calls: u32,

    /// Failures the rate source produces before it recovers.
    #[arg(long, default_value_t = 2)]
    failures: u32,

    /// Fail with a non-transient error instead of a timeout.
    #[arg(long)]
    fatal: bool,

    /// Rate returned when every attempt fails.
    #[arg(long)]
    fallback: Option<f64>,

    /// Print the circuit breaker state store as JSON at the end.
    #[arg(long)]
    report: bool,
}

#[derive(Debug, Error)]
enum RateError {
    #[error("rate source unavailable ({0})")]
    Unavailable(TransientKind),

    #[error("no rate for {from}/{to}")]
    UnknownPair { from: String, to: String },
}

impl Transient for RateError {
    fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            RateError::Unavailable(kind) => Some(*kind),
            RateError::UnknownPair { .. } => None,
        }
    }
}

/// Exchange-rate source that fails a fixed number of times before recovering.
struct SimulatedRateSource {
    failures_left: AtomicU32,
    fatal: bool,
}

impl SimulatedRateSource {
    fn new(failures: u32, fatal: bool) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            fatal,
        }
    }

    async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, RateError> {
        let latency = rand::thread_rng().gen_range(20..80);
        tokio::time::sleep(Duration::from_millis(latency)).await;

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(if self.fatal {
                RateError::UnknownPair {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            } else {
                RateError::Unavailable(TransientKind::Timeout)
            });
        }

        let rate = 0.92 * rand::thread_rng().gen_range(0.99..1.01);
        Ok(amount * rate)
    }
}

fn default_config() -> NinjaConfig {
    NinjaConfig {
        retry: Some(RetryConfig {
            policy: RetryPolicy::Linear,
            retry_count: 3,
            interval_ms: 500,
            max_interval_ms: None,
        }),
        circuit_breaker: Some(CircuitBreakerConfig {
            key: "currency-converter".to_string(),
            exception_threshold: 5,
            success_threshold: 5,
            break_duration_ms: 5_000,
        }),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("ninja-resilience v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    signals::spawn_ctrl_c_handler(shutdown.clone());

    let policy = config.policy();
    tracing::info!(
        retry = ?policy.retry,
        circuit_breaker = ?policy.circuit_breaker,
        "Configuration loaded"
    );

    let store = StateStore::new();
    let orchestrator = Orchestrator::new(policy, store.clone()).with_cancellation(shutdown.token());
    let source = Arc::new(SimulatedRateSource::new(cli.failures, cli.fatal));

    for call in 1..=cli.calls {
        if shutdown.is_triggered() {
            break;
        }

        let convert = || {
            let source = source.clone();
            let (amount, from, to) = (cli.amount, cli.from.clone(), cli.to.clone());
            async move { source.convert(amount, &from, &to).await }
        };

        let result = match cli.fallback {
            Some(rate) => {
                let amount = cli.amount;
                orchestrator
                    .execute_with_fallback(convert, move || async move { Ok(amount * rate) })
                    .await
            }
            None => orchestrator.execute(convert).await,
        };

        match result {
            Ok(converted) => println!(
                "[{call}] {:.2} {} = {:.2} {}",
                cli.amount, cli.from, converted, cli.to
            ),
            Err(e) => println!("[{call}] conversion failed: {e}"),
        }
    }

    if cli.report {
        println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
    }

    shutdown.trigger();
    tracing::info!("Shutdown complete");
    Ok(())
}
