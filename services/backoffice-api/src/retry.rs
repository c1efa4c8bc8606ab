// Retry Strategy - Exponential backoff with jitter for provider calls

use crate::config::RetryConfig;
use crate::errors::{BackofficeError, Result};
use std::time::Duration;
use tracing::{info, warn};

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Delay before the retry following `attempt` (0-based)
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        // Jitter spreads out retries from concurrent callers
        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Callers must make the operation idempotent on the provider side
    /// (every provider request carries the action's idempotency key).
    pub async fn execute_with_retry<F, Fut, T>(&self, operation: F, operation_name: &str) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_delay(attempt - 1);
                warn!(
                    "Retry attempt {}/{} for {} after {:?}",
                    attempt, self.config.max_retries, operation_name, delay
                );
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            "Operation {} succeeded on retry attempt {}/{}",
                            operation_name, attempt, self.config.max_retries
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_transient() {
                        warn!("Non-retryable error for {}: {}", operation_name, e);
                        return Err(e);
                    }

                    warn!(
                        "Attempt {}/{} failed for {}: {}",
                        attempt + 1,
                        self.config.max_retries + 1,
                        operation_name,
                        e
                    );

                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BackofficeError::Internal("Max retries exceeded without error".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = RetryStrategy::new(no_jitter(3));

        assert_eq!(strategy.calculate_delay(0).as_millis(), 1000);
        assert_eq!(strategy.calculate_delay(1).as_millis(), 2000);
        assert_eq!(strategy.calculate_delay(2).as_millis(), 4000);
        // Capped
        assert_eq!(strategy.calculate_delay(10).as_millis(), 5000);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let strategy = RetryStrategy::new(RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            ..no_jitter(3)
        });
        let calls = Arc::new(AtomicU32::new(0));

        let result = strategy
            .execute_with_retry(
                || {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(BackofficeError::ProviderTimeout("swap".to_string()))
                        } else {
                            Ok("SWAP-1")
                        }
                    }
                },
                "execute_swap",
            )
            .await;

        assert_eq!(result.unwrap(), "SWAP-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let strategy = RetryStrategy::new(RetryConfig {
            initial_delay_ms: 1,
            ..no_jitter(5)
        });
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = strategy
            .execute_with_retry(
                || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(BackofficeError::ProviderRejected {
                            provider: "payout".to_string(),
                            message: "invalid IBAN".to_string(),
                        })
                    }
                },
                "create_payout",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
