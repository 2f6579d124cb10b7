use std::time::Duration;

use tokio::time::Instant;

/// How [`wait_for`] spaces its checks and when it gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    /// Multiplier applied to the interval after every unsuccessful check.
    /// `1.0` keeps a fixed cadence.
    pub backoff: f64,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            backoff: 1.0,
            timeout,
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff <= 1.0 {
            return current;
        }
        current.mul_f64(self.backoff).min(self.max_interval.max(self.interval))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeout {
    pub elapsed: Duration,
}

impl std::fmt::Display for PollTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timed out after {}s", self.elapsed.as_secs())
    }
}

impl std::error::Error for PollTimeout {}

/// Run `check` until it yields a value or the policy's timeout passes.
///
/// The first check happens immediately and one final check happens at the
/// deadline. Sleeps use tokio's clock, so a paused runtime advances through
/// them instantly.
pub async fn wait_for<T, F>(policy: &PollPolicy, mut check: F) -> Result<T, PollTimeout>
where
    F: FnMut() -> Option<T>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut interval = policy.interval;

    loop {
        if let Some(value) = check() {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout {
                elapsed: now - start,
            });
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = policy.next_interval(interval);
    }
}
