//! Backoff strategies between retry attempts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy, selected once when the options are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Constant delay of `interval` before every retry.
    #[default]
    Linear,
    /// Delay doubles with each retry, starting at `interval`.
    Exponential,
}

impl RetryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryPolicy::Linear => "linear",
            RetryPolicy::Exponential => "exponential",
        }
    }

    /// Delay before retry `attempt` (1-indexed). Attempt 0 is the initial call
    /// and never waits.
    pub fn backoff(&self, attempt: u32, interval: Duration, max_interval: Option<Duration>) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self {
            RetryPolicy::Linear => interval,
            RetryPolicy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                interval.saturating_mul(factor)
            }
        };

        match max_interval {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
