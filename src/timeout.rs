//! Timeout policy used to bound storage I/O and capability calls.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

/// The wrapped operation did not finish within its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut {
    /// Time spent before giving up.
    pub elapsed: Duration,
    /// Configured limit.
    pub timeout: Duration,
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation timed out after {:?} (limit: {:?})", self.elapsed, self.timeout)
    }
}

impl std::error::Error for TimedOut {}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Panics if duration is zero or `Duration::MAX`.
    pub fn new(duration: Duration) -> Self {
        assert!(
            duration > Duration::ZERO && duration < Duration::MAX,
            "timeout duration must be non-zero and finite",
        );
        Self { duration }
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Drive `fut` to completion or fail with [`TimedOut`]. The future is dropped on timeout.
    pub async fn execute<T, Fut>(&self, fut: Fut) -> Result<T, TimedOut>
    where
        Fut: Future<Output = T>,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, fut).await {
            Ok(value) => Ok(value),
            Err(_) => Err(TimedOut { elapsed: start.elapsed(), timeout: self.duration }),
        }
    }
}
