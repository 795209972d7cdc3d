//! Bounded retry around remote calls.

use std::thread;
use std::time::Duration;

use crate::error::{RemoteError, Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
        })
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): initial × 2^(attempt−1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(1 << exp)
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    /// A rate-limit hint longer than the backoff delay wins.
    pub fn call<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, RemoteError>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let mut delay = self.delay_for(attempt);
                    if let RemoteError::RateLimited {
                        retry_after: Some(hint),
                    } = &err
                    {
                        delay = delay.max(*hint);
                    }
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
                        what,
                        attempt,
                        self.max_attempts,
                        err,
                        delay.as_secs_f64()
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!("{} gave up after {} attempt(s): {}", what, attempt, err);
                    return Err(SyncError::from_remote(err, attempt));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100)).unwrap();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(RetryPolicy::new(0, Duration::ZERO).is_err());
    }

    #[test]
    fn test_recovers_from_transient() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3).call("fetch", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RemoteError::Transient("timeout".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_exhausted_is_transient_error() {
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::immediate(2).call("fetch", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::RateLimited { retry_after: None })
        });
        assert!(matches!(result, Err(SyncError::TransientRemote { attempts: 2, .. })));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_fatal_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::immediate(5).call("search", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::Unauthorized("token revoked".into()))
        });
        assert!(matches!(result, Err(SyncError::FatalRemote(_))));
        assert_eq!(calls.get(), 1);
    }
}
