//! Bounded exponential backoff for source and destination I/O.
//!
//! Only transient `io::ErrorKind`s are retried. Retries wrap whole idempotent
//! operations (opening a file, committing a rename), never codec or scaler updates.

use std::io;
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

/// Upper bound of a single backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation`, retrying transient I/O failures.
    pub fn run<T, F>(&self, what: &str, mut operation: F) -> io::Result<T>
    where
        F: FnMut() -> io::Result<T>,
    {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    thread::sleep(delay);
                }
                Err(e) => {
                    if attempt > 0 {
                        error!("{} failed after {} attempts: {}", what, attempt + 1, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Whether an I/O error may go away on its own.
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(40), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_retries_transient_errors() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = policy.run("open source", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::from(io::ErrorKind::Interrupted))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: io::Result<()> = policy.run("open source", || {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::TimedOut))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_errors_fail_fast() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result: io::Result<()> = policy.run("open source", || {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::NotFound))
        });

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(calls.get(), 1);
    }
}
