//! Retry policy, backoff with jitter, and the sleep/deadline primitives the
//! extraction client is parameterised over.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Ceiling on provider calls per document, whatever the error mix.
    pub max_attempts: u32,
    /// Additional attempts allowed for timeouts and rate limits.
    pub transport_retries: u32,
    /// Additional attempts allowed for malformed or invalid responses.
    pub repair_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            transport_retries: 2,
            repair_attempts: 1,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before transport retry number `retry` (1-based):
    /// base, 2x base, 4x base ... capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// `backoff` plus uniform jitter in `[0, jitter_ratio * backoff]`.
    pub fn backoff_with_jitter<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let delay = self.backoff(retry);
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(self.jitter_ratio * rng.gen::<f64>());
        delay + extra
    }
}

/// Sleep used between transport retries. Tests inject a recording fake.
#[async_trait]
pub trait RetryClock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl RetryClock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Optional overall deadline for a batch. `Deadline::default()` never expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(duration: Duration) -> Self {
        Self(Some(Instant::now() + duration))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}
