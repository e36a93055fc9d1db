//! Exponential backoff shared by every model call.
//!
//! Transient failures are retried until they succeed or the run is
//! cancelled. Each attempt and each sleep is raced against the
//! cancellation token.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::llm::LlmError;

/// Backoff shape
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl BackoffPolicy {
    /// Same shape without jitter
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Fresh delay sequence
    pub fn schedule(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
            last: Duration::ZERO,
        }
    }
}

/// Delay sequence for one retried call. Never decreases, never exceeds the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_at_least(Duration::ZERO)
    }

    /// Next delay, raised to at least `floor` (a server's Retry-After)
    pub fn next_delay_at_least(&mut self, floor: Duration) -> Duration {
        let policy = &self.policy;
        let exponent = self.attempt.min(1024) as i32;
        let base = policy.initial_delay.as_secs_f64() * policy.multiplier.powi(exponent);
        let jitter = if policy.max_jitter.is_zero() {
            0.0
        } else {
            rand::rng().random_range(0.0..=policy.max_jitter.as_secs_f64())
        };

        let secs = (base + jitter).max(0.0);
        let raw = if secs.is_finite() && secs < policy.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            policy.max_delay
        };

        let delay = raw.max(floor).max(self.last).min(policy.max_delay);
        self.attempt = self.attempt.saturating_add(1);
        self.last = delay;
        delay
    }

    /// Delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Run `op` until it succeeds, fails non-transiently, or `cancel` fires.
///
/// `op` receives the zero-based attempt number. Rate-limit errors raise the
/// next delay to their Retry-After.
pub async fn retry_transient<T, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, LlmError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut backoff = policy.schedule();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = op(attempt) => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => err,
            Err(err) => return Err(err),
        };

        let floor = match &err {
            LlmError::RateLimited { retry_after } => *retry_after,
            _ => Duration::ZERO,
        };
        let delay = backoff.next_delay_at_least(floor);

        tracing::warn!(
            label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}
