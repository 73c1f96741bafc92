//! Retry helper for transient database failures.
//!
//! Connection drops, pool timeouts, and serialization/deadlock rollbacks are
//! retried with exponential backoff and jitter. Integrity violations (unique
//! or foreign key constraints) are permanent and surface immediately.

use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Postgres SQLSTATE codes that indicate a retryable rollback.
const RETRYABLE_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "57P03", // cannot_connect_now
    "53300", // too_many_connections
];

pub fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => ErrorClass::Transient,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            match code.as_deref() {
                Some(code) if RETRYABLE_SQLSTATES.contains(&code) => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            }
        }
        _ => ErrorClass::Permanent,
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("DB_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            base_delay: std::env::var("DB_RETRY_BASE_DELAY")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.base_delay),
            max_delay: std::env::var("DB_RETRY_MAX_DELAY")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Exponential backoff for the given 1-based attempt, capped at
    /// `max_delay`, with up to 25% random jitter added.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter = capped.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
        capped + jitter
    }
}

/// Run `op` until it succeeds, a permanent error surfaces, or attempts are
/// exhausted.
pub async fn with_retry<T, F, Fut>(
    op_name: &str,
    config: &RetryConfig,
    mut op: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if classify(&err) == ErrorClass::Transient && attempt < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "DB operation '{}' failed (attempt {}/{}), retrying in {:.2}s: {}",
                    op_name,
                    attempt,
                    config.max_attempts,
                    delay.as_secs_f64(),
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if classify(&err) == ErrorClass::Transient {
                    error!(
                        "DB operation '{}' failed after {} attempts: {}",
                        op_name, config.max_attempts, err
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert_eq!(classify(&sqlx::Error::PoolTimedOut), ErrorClass::Transient);
    }

    #[test]
    fn row_not_found_is_permanent() {
        assert_eq!(classify(&sqlx::Error::RowNotFound), ErrorClass::Permanent);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        // Jitter adds at most 25%, so compare against the capped base.
        assert!(config.delay_for_attempt(1) >= Duration::from_millis(100));
        assert!(config.delay_for_attempt(1) < Duration::from_millis(126));
        assert!(config.delay_for_attempt(10) <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry("test", &RetryConfig::default(), || {
            calls += 1;
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_until_exhausted() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let mut calls = 0;
        let result: Result<(), _> = with_retry("test", &config, || {
            calls += 1;
            async { Err(sqlx::Error::PoolTimedOut) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
