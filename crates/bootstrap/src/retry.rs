//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::BootstrapError;

/// Retry configuration for operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that retries immediately. Used by tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate the delay for a given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(10)).unwrap_or(10);
        let multiplier = self.backoff_multiplier.powi(exp);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry given the number of attempts made.
    #[must_use]
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delays slept between consecutive attempts.
    ///
    /// There is one fewer delay than attempts: nothing is slept after the
    /// last failure.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }
}

/// Execute a function with retry logic.
///
/// # Errors
///
/// Returns [`BootstrapError::RetriesExhausted`] carrying the last error if
/// every attempt fails.
pub fn with_retry<T, E, F>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, BootstrapError>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f() {
            Ok(result) => {
                if attempt > 0 {
                    info!("{operation_name} succeeded after {} attempts", attempt + 1);
                }
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(BootstrapError::RetriesExhausted {
                        command: operation_name.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }

                let delay = config.delay_for_attempt(attempt - 1);
                warn!(
                    "{operation_name} failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {delay:?}..."
                );
                std::thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let config = RetryConfig::default();
        assert_eq!(
            config.schedule(),
            vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40),
                Duration::from_secs(60),
            ]
        );
    }

    #[test]
    fn test_delay_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(100), config.max_delay);
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(4));
        assert!(!config.should_retry(5));
    }

    #[test]
    fn test_with_retry_eventually_succeeds() {
        let mut calls = 0;
        let result = with_retry(&RetryConfig::immediate(5), "flaky", || {
            calls += 1;
            if calls < 3 {
                Err("not yet")
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_with_retry_exhausts_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(4), "broken", || {
            calls += 1;
            Err(format!("failure {calls}"))
        });

        assert_eq!(calls, 4);
        match result.unwrap_err() {
            BootstrapError::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "failure 4");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
