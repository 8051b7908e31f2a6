//! Bounded retry for transient device faults.
//!
//! Hardware links drop mid-session all the time: the cable wiggles, the
//! screensaver locks the app, the host suspends the HID handle. Those
//! faults are worth one or two automatic re-init + resend cycles; anything
//! past the cap is surfaced as a real disconnect.

use std::{fmt, future::Future, time::Duration};
use tracing::warn;

/// How often and how patiently an operation is retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Optional pause between attempts.
    pub backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: None,
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: None,
        }
    }

    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Runs `op`, retrying while `transient` classifies the error as
    /// retryable and the attempt cap is not exhausted. The attempt number
    /// (starting at 0) is passed to `op` so callers can re-initialize a
    /// device handle before resending.
    pub async fn run<T, E, Fut, Op, Cl>(&self, mut op: Op, transient: Cl) -> Result<T, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Cl: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts.max(1) || !transient(&err) {
                        return Err(err);
                    }
                    warn!(%err, attempt, "transient device fault, retrying");
                    if let Some(delay) = self.backoff {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
