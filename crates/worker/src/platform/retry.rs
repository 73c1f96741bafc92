//! Retry and pacing for platform API calls.
//!
//! A `Retry-After` hint always wins; otherwise exponential backoff with up
//! to 50% jitter. Permission and not-found failures surface immediately.

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::warn;

use super::PlatformError;

#[derive(Debug, Clone)]
pub struct PlatformRetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PlatformRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Backoff before retry number `attempt` (1-based), honoring any
/// `Retry-After` the platform sent.
pub fn retry_delay(
    error: &PlatformError,
    attempt: u32,
    config: &PlatformRetryConfig,
) -> Duration {
    if let PlatformError::RateLimited {
        retry_after: Some(seconds),
    } = error
    {
        // Small buffer on top of the server's hint.
        return Duration::from_secs_f64(seconds + 0.5);
    }

    let exp = config
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(config.max_delay);
    let jitter = capped.mul_f64(rand::thread_rng().gen_range(0.0..0.5));
    capped + jitter
}

pub async fn execute_with_retry<T, F, Fut>(
    config: &PlatformRetryConfig,
    mut op: F,
) -> Result<T, PlatformError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = retry_delay(&err, attempt, config);
                warn!(
                    "Platform API error (attempt {}/{}), retrying in {:.2}s: {}",
                    attempt,
                    config.max_retries,
                    delay.as_secs_f64(),
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Cumulative wait after a history page: 0.5s per 100 messages fetched.
pub fn pace_duration(page_size: usize) -> Duration {
    Duration::from_secs_f64(page_size as f64 / 100.0 * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_takes_precedence_over_backoff() {
        let config = PlatformRetryConfig::default();
        let err = PlatformError::RateLimited {
            retry_after: Some(7.0),
        };
        assert_eq!(retry_delay(&err, 1, &config), Duration::from_secs_f64(7.5));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = PlatformRetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        };
        let err = PlatformError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        // Jitter adds at most 50% on top of the capped exponential delay.
        let first = retry_delay(&err, 1, &config);
        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1501));
        let third = retry_delay(&err, 3, &config);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_secs(6));
    }

    #[test]
    fn pacing_scales_with_page_size() {
        assert_eq!(pace_duration(0), Duration::ZERO);
        assert_eq!(pace_duration(100), Duration::from_millis(500));
        assert_eq!(pace_duration(40), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let config = PlatformRetryConfig::default();
        let mut calls = 0;
        let result: Result<(), _> = execute_with_retry(&config, || {
            calls += 1;
            async { Err(PlatformError::Forbidden("nope".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_then_surface() {
        let config = PlatformRetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let mut calls = 0;
        let result: Result<(), _> = execute_with_retry(&config, || {
            calls += 1;
            async {
                Err(PlatformError::Api {
                    status: 500,
                    message: "boom".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
