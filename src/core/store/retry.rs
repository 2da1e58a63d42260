//! Bounded retry with exponential backoff for busy/locked stores.

use crate::error::StoreError;
use std::thread;
use std::time::Duration;

/// Backoff policy for retryable store errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `op`, retrying while it fails with a retryable error.
    ///
    /// After the last attempt the error is surfaced as
    /// [`StoreError::Locked`] carrying the attempt count.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() => {
                    if attempt >= self.max_attempts {
                        return Err(StoreError::Locked { attempts: attempt });
                    }
                    let delay = self.delay(attempt);
                    tracing::debug!(attempt, ?delay, "store busy, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(25));
        assert_eq!(policy.delay(3), Duration::from_millis(100));
    }

    #[test]
    fn succeeds_after_transient_lock() {
        let mut calls = 0;
        let result = fast().run(|| {
            calls += 1;
            if calls < 3 {
                Err(StoreError::Locked { attempts: 1 })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = fast().run(|| {
            calls += 1;
            Err(StoreError::Locked { attempts: 1 })
        });
        assert!(matches!(result, Err(StoreError::Locked { attempts: 5 })));
        assert_eq!(calls, 5);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = fast().run(|| {
            calls += 1;
            Err(StoreError::UnknownPhoto { id: 1 })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
