//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, parseable addresses)
//! - Require at least one resilience behaviour
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: NinjaConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::NinjaConfig;
use crate::resilience::ValidationError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a parsed configuration.
pub fn validate_config(config: &NinjaConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.retry.is_none() && config.circuit_breaker.is_none() {
        errors.push(ValidationError::new(
            "config",
            "at least one of [retry] or [circuit_breaker] is required",
        ));
    }

    if let Some(retry) = &config.retry {
        if let Some(max) = retry.max_interval_ms {
            if max < retry.interval_ms {
                errors.push(ValidationError::new(
                    "retry.max_interval_ms",
                    "must not be smaller than interval_ms",
                ));
            }
        }
    }

    if let Some(breaker) = &config.circuit_breaker {
        errors.extend(breaker.options().validate());
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
