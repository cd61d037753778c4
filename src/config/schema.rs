//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.
//! Durations are expressed in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{CircuitBreakerOptions, ExecutionPolicy, RetryOptions, RetryPolicy};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NinjaConfig {
    /// Retry settings; absent means no retry.
    pub retry: Option<RetryConfig>,

    /// Circuit breaker settings; absent means no breaker.
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl NinjaConfig {
    /// Build the execution policy described by this file.
    pub fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::new(
            self.retry.as_ref().map(RetryConfig::options),
            self.circuit_breaker.as_ref().map(CircuitBreakerConfig::options),
        )
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff policy (`linear` or `exponential`).
    pub policy: RetryPolicy,

    /// Number of retries after the initial attempt.
    pub retry_count: u32,

    /// Base delay between attempts in milliseconds.
    pub interval_ms: u64,

    /// Optional cap on a single delay in milliseconds.
    pub max_interval_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::Linear,
            retry_count: 3,
            interval_ms: 500,
            max_interval_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn options(&self) -> RetryOptions {
        let options = RetryOptions::new(
            self.policy,
            self.retry_count,
            Duration::from_millis(self.interval_ms),
        );
        match self.max_interval_ms {
            Some(ms) => options.with_max_interval(Duration::from_millis(ms)),
            None => options,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Key identifying the protected operation.
    pub key: String,

    /// Failures before the circuit opens.
    pub exception_threshold: u32,

    /// Successful half-open probes before the circuit closes.
    pub success_threshold: u32,

    /// Time the circuit stays open in milliseconds.
    pub break_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            key: "default".to_string(),
            exception_threshold: 5,
            success_threshold: 1,
            break_duration_ms: 5_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn options(&self) -> CircuitBreakerOptions {
        CircuitBreakerOptions::new(
            self.key.clone(),
            self.exception_threshold,
            self.success_threshold,
            Duration::from_millis(self.break_duration_ms),
        )
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [retry]
            policy = "exponential"
            retry_count = 4
            interval_ms = 250
            max_interval_ms = 2000

            [circuit_breaker]
            key = "currency-rates"
            exception_threshold = 3
            success_threshold = 2
            break_duration_ms = 10000

            [observability]
            log_level = "debug"
        "#;

        let config: NinjaConfig = toml::from_str(toml).unwrap();
        let policy = config.policy();

        let retry = policy.retry.unwrap();
        assert_eq!(retry.policy, RetryPolicy::Exponential);
        assert_eq!(retry.retry_count, 4);
        assert_eq!(retry.interval, Duration::from_millis(250));
        assert_eq!(retry.max_interval, Some(Duration::from_secs(2)));

        let breaker = policy.circuit_breaker.unwrap();
        assert_eq!(breaker.key, "currency-rates");
        assert_eq!(breaker.break_duration, Duration::from_secs(10));

        assert_eq!(config.observability.log_level, "debug");
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_missing_sections_are_unconfigured() {
        let config: NinjaConfig = toml::from_str("[retry]\nretry_count = 1\n").unwrap();
        let policy = config.policy();
        assert!(policy.circuit_breaker.is_none());
        assert_eq!(policy.retry.unwrap().interval, Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result: Result<NinjaConfig, _> = toml::from_str("[retry]\npolicy = \"fibonacci\"\n");
        assert!(result.is_err());
    }
}
