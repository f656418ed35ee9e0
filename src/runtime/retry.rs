//! Retry policy
//!
//! Exponential backoff for transient failures. Internal work (file I/O,
//! batched inference) retries on a short schedule; requests to the LLM
//! collaborator use a longer one. Non-transient errors are never retried.

use crate::error;
use anyhow::Result;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Schedule for internal I/O and inference batches: 200 ms base, x2, 3 attempts.
    pub fn internal() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            factor: 2,
            max_attempts: 3,
        }
    }

    /// Schedule for HTTP requests to the LLM collaborator: 1 s base, x2, 3 attempts.
    pub fn remote() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_attempts: 3,
        }
    }

    /// Same attempt count with no delay between attempts.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            factor: 1,
            max_attempts: 3,
        }
    }

    /// Run an async operation under this policy.
    ///
    /// Retries only failures classified as transient by the error taxonomy;
    /// every other error propagates on the first attempt.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && error::is_transient(&err) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.max_attempts,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    delay *= self.factor;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run a blocking operation under this policy.
    ///
    /// Used from pool workers where sleeping the thread is acceptable.
    pub fn run_blocking<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && error::is_transient(&err) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.max_attempts,
                        delay,
                        err
                    );
                    std::thread::sleep(delay);
                    delay *= self.factor;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate();

        let result = policy
            .run("flaky op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RagError::TransientIo("disk busy".into()).into())
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate();

        let result: Result<()> = policy
            .run("config op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RagError::Config("bad setting".into()).into()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate();

        let result: Result<()> = policy
            .run("always failing", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RagError::TransientRemote("500".into()).into()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_blocking_variant_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate();

        let result = policy.run_blocking("flaky batch", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(RagError::TransientIo("lock held".into()).into())
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_schedules() {
        let internal = RetryPolicy::internal();
        assert_eq!(internal.base_delay, Duration::from_millis(200));
        assert_eq!(internal.max_attempts, 3);

        let remote = RetryPolicy::remote();
        assert_eq!(remote.base_delay, Duration::from_secs(1));
        assert_eq!(remote.factor, 2);
    }
}
