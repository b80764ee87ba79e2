use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Result of running an operation under the retry policy.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal { error: E, attempts: u32 },
    /// The error was retryable, but the configured attempts were exhausted.
    AttemptsExceeded { error: E, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. } | RetryError::AttemptsExceeded { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_error(self) -> E {
        match self {
            RetryError::Fatal { error, .. } | RetryError::AttemptsExceeded { error, .. } => error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Executes the operation with the configured retry policy.
    ///
    /// `on_retry` is told about every failed attempt that will be retried,
    /// with the attempt number and the delay before the next one. On success
    /// the number of attempts spent is returned next to the value.
    pub async fn run<F, Fut, T, E, Classifier, OnRetry>(
        &self,
        mut op: F,
        classify: Classifier,
        mut on_retry: OnRetry,
    ) -> Result<(T, u32), RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
        OnRetry: FnMut(&E, u32, Duration),
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(result) => return Ok((result, attempt)),
                Err(error) => match classify(&error) {
                    RetryDisposition::Stop => {
                        return Err(RetryError::Fatal {
                            error,
                            attempts: attempt,
                        });
                    }
                    RetryDisposition::Retry => {
                        if attempt >= self.max_attempts {
                            return Err(RetryError::AttemptsExceeded {
                                error,
                                attempts: attempt,
                            });
                        }

                        let delay = self.backoff_delay(attempt - 1);
                        on_retry(&error, attempt, delay);
                        sleep(delay).await;
                    }
                },
            }
        }
    }

    /// Delay after the `attempt`-th failure (0-based), doubling up to `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let factor = 1u128 << attempt.min(16);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let mut retries = 0;
        let result = fast(3)
            .run(
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("flaky")
                    } else {
                        Ok(7)
                    }
                },
                |_| RetryDisposition::Retry,
                |_, _, _| retries += 1,
            )
            .await;
        assert_eq!(result, Ok((7, 3)));
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn stops_on_fatal() {
        let result: Result<((), u32), _> = fast(5)
            .run(
                || async { Err("bad") },
                |_| RetryDisposition::Stop,
                |_, _, _| {},
            )
            .await;
        assert_eq!(
            result,
            Err(RetryError::Fatal {
                error: "bad",
                attempts: 1
            })
        );
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let result: Result<((), u32), _> = fast(2)
            .run(
                || async { Err("down") },
                |_| RetryDisposition::Retry,
                |_, _, _| {},
            )
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 2);
        assert!(matches!(err, RetryError::AttemptsExceeded { .. }));
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(350));
    }
}
