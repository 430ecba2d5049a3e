//! Bounded exponential backoff interruptible by shutdown.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

const DEFAULT_INITIAL_MS: u64 = 100;
const DEFAULT_MAX_MS: u64 = 60_000;
const DEFAULT_JITTER: f64 = 0.2;
// 2^31 * 100ms is far past any sensible cap.
const MAX_EXPONENT: u32 = 31;

/// Backoff parameters shared by every stage that reconnects or retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Extra fraction of the base delay added at random, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(DEFAULT_INITIAL_MS),
            max_interval: Duration::from_millis(DEFAULT_MAX_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryConfig {
    /// Same intervals without randomness.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

/// Retry pacing for a single loop.
///
/// Each [`Throttle::retry`] waits the current delay and doubles it for the
/// next call, up to the configured maximum. [`Throttle::reset`] returns to
/// the initial interval. Jitter is capped at 1.0 so a jittered delay never
/// exceeds the next un-jittered one, keeping waits non-decreasing.
#[derive(Debug, Clone)]
pub struct Throttle {
    config: RetryConfig,
    attempts: u32,
    shutdown: CancellationToken,
}

impl Throttle {
    pub fn new(config: RetryConfig, shutdown: CancellationToken) -> Self {
        let jitter = if config.jitter.is_finite() {
            config.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            config: RetryConfig { jitter, ..config },
            attempts: 0,
            shutdown,
        }
    }

    /// Consecutive retries since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay the next retry will wait, before jitter.
    pub fn current_delay(&self) -> Duration {
        let exp = self.attempts.min(MAX_EXPONENT);
        self.config
            .initial_interval
            .saturating_mul(1u32 << exp)
            .min(self.config.max_interval)
    }

    /// Collapse the backoff to its initial interval.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Wait out the current delay.
    ///
    /// Returns `false` without waiting if shutdown has already fired, or as
    /// soon as it fires during the wait; `true` once the delay elapses.
    pub async fn retry(&mut self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let delay = self.jittered(self.current_delay());
        self.attempts = self.attempts.saturating_add(1);

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen::<f64>() * self.config.jitter;
        base.mul_f64(factor).min(self.config.max_interval)
    }
}

/// Whether a failure on `attempt` (1-based) should be logged.
///
/// Logs on attempts 1, 2, 4, 8, ... so a long outage does not flood the log.
pub fn should_log_attempt(attempt: u32) -> bool {
    attempt.is_power_of_two()
}
