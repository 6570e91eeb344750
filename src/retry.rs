//! Retry logic with exponential backoff
//!
//! Transient failures (connection errors, timeouts, 5xx) are retried with a
//! capped, doubling delay and optional jitter. Anything else is returned
//! immediately.
//!
//! # Example
//!
//! ```no_run
//! use calwatch::retry::{IsRetryable, with_retry};
//! use calwatch::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, server busy) return `true`.
/// Permanent failures (rejected session, 4xx, corrupt data) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network { .. } | FetchError::ServerError { .. }
        )
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // SQLITE_BUSY surfaces as a query failure and is worth another try
            Error::Sqlx(sqlx::Error::Database(db)) => db.message().contains("locked"),
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation runs once, then up to `config.max_attempts` more times while
/// it keeps failing with a retryable error. Returns the first success or the
/// last error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                let wait = if config.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = wait.as_millis(),
                    "transient failure, retrying"
                );

                tokio::time::sleep(wait).await;
                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt + 1,
                        "retry budget exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "non-retryable failure");
                }
                return Err(e);
            }
        }
    }
}

/// Delay for the attempt after one that waited `delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay)
}

/// Stretch a delay by a uniform 0-100%, so the result lies in `[delay, 2 * delay]`
fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
