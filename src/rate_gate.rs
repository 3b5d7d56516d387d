//! Per-source rate limiting
//!
//! Combines a token bucket (burst control) with a sliding window counter
//! (upstream quota control). Mutable state per source lives behind a
//! `parking_lot::Mutex`, mirroring how the rest of this crate serializes
//! per-source critical sections (see [`crate::circuit_breaker`]).

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::RateGateError;

/// Static configuration for one source's rate gate.
#[derive(Debug, Clone, Copy)]
pub struct RateGateConfig {
    /// Token bucket capacity.
    pub burst: u32,
    /// Token bucket refill rate, tokens/second.
    pub refill_per_sec: f64,
    /// Sliding window request quota.
    pub window_limit: u32,
    /// Sliding window duration.
    pub window: Duration,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            burst: 10,
            refill_per_sec: 5.0,
            window_limit: 60,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Default)]
struct WindowState {
    /// Timestamps of admitted requests still inside the window.
    hits: Vec<Instant>,
}

struct Inner {
    config: RateGateConfig,
    bucket: Mutex<BucketState>,
    window: Mutex<WindowState>,
}

/// Token-bucket + sliding-window limiter for a single source.
pub struct RateGate {
    inner: Inner,
}

impl RateGate {
    pub fn new(config: RateGateConfig) -> Self {
        Self {
            inner: Inner {
                bucket: Mutex::new(BucketState { tokens: config.burst as f64, last_refill: Instant::now() }),
                window: Mutex::new(WindowState::default()),
                config,
            },
        }
    }

    /// Time until both bounds would admit one more request, measured from `now`.
    fn wait_needed(&self, now: Instant) -> Duration {
        let bucket_wait = {
            let mut b = self.inner.bucket.lock();
            let elapsed = now.saturating_duration_since(b.last_refill).as_secs_f64();
            let refilled = (b.tokens + elapsed * self.inner.config.refill_per_sec)
                .min(self.inner.config.burst as f64);
            b.tokens = refilled;
            b.last_refill = now;
            if refilled >= 1.0 {
                Duration::ZERO
            } else {
                let deficit = 1.0 - refilled;
                Duration::from_secs_f64(deficit / self.inner.config.refill_per_sec)
            }
        };

        let window_wait = {
            let mut w = self.inner.window.lock();
            let cutoff = now.checked_sub(self.inner.config.window).unwrap_or(now);
            w.hits.retain(|t| *t > cutoff);
            if (w.hits.len() as u32) < self.inner.config.window_limit {
                Duration::ZERO
            } else {
                let oldest = w.hits.first().copied().unwrap_or(now);
                (oldest + self.inner.config.window).saturating_duration_since(now)
            }
        };

        bucket_wait.max(window_wait)
    }

    fn commit_admission(&self, now: Instant) {
        {
            let mut b = self.inner.bucket.lock();
            b.tokens = (b.tokens - 1.0).max(0.0);
        }
        {
            let mut w = self.inner.window.lock();
            w.hits.push(now);
        }
    }

    /// Acquire a permit, sleeping until admission if necessary but never past `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), RateGateError> {
        loop {
            let now = Instant::now();
            let wait = self.wait_needed(now);
            if wait == Duration::ZERO {
                self.commit_admission(now);
                return Ok(());
            }
            let admit_at = now + wait;
            if admit_at > deadline {
                return Err(RateGateError::DeadlineExceeded);
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Feed back an upstream 429: burn the bucket and push the window's
    /// earliest eviction point out by `retry_after`.
    pub fn penalize(&self, retry_after: Duration) {
        let now = Instant::now();
        {
            let mut b = self.inner.bucket.lock();
            b.tokens = 0.0;
            b.last_refill = now;
        }
        {
            let mut w = self.inner.window.lock();
            // Pad the window so the sliding-window bound also backs off.
            let padded = now + retry_after;
            w.hits.push(padded - self.inner.config.window);
        }
    }

    #[cfg(test)]
    fn current_tokens(&self) -> f64 {
        self.inner.bucket.lock().tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_within_burst_immediately() {
        let gate = RateGate::new(RateGateConfig { burst: 3, refill_per_sec: 1.0, window_limit: 100, window: Duration::from_secs(60) });
        let deadline = Instant::now() + Duration::from_secs(5);
        for _ in 0..3 {
            gate.acquire(deadline).await.unwrap();
        }
        assert!(gate.current_tokens() < 1.0);
    }

    #[tokio::test]
    async fn deadline_exceeded_when_bucket_empty_and_deadline_too_soon() {
        let gate = RateGate::new(RateGateConfig { burst: 1, refill_per_sec: 0.1, window_limit: 100, window: Duration::from_secs(60) });
        let deadline = Instant::now() + Duration::from_millis(10);
        gate.acquire(deadline).await.unwrap();
        let err = gate.acquire(deadline).await;
        assert!(matches!(err, Err(RateGateError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn window_limit_blocks_beyond_quota() {
        let gate = RateGate::new(RateGateConfig { burst: 100, refill_per_sec: 1000.0, window_limit: 2, window: Duration::from_secs(60) });
        let deadline = Instant::now() + Duration::from_millis(5);
        gate.acquire(deadline).await.unwrap();
        gate.acquire(deadline).await.unwrap();
        let err = gate.acquire(deadline).await;
        assert!(matches!(err, Err(RateGateError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn tokens_never_go_negative() {
        let gate = RateGate::new(RateGateConfig { burst: 2, refill_per_sec: 1.0, window_limit: 100, window: Duration::from_secs(60) });
        let deadline = Instant::now() + Duration::from_secs(1);
        for _ in 0..2 {
            gate.acquire(deadline).await.unwrap();
        }
        assert!(gate.current_tokens() >= 0.0);
    }

    #[test]
    fn penalize_zeroes_the_bucket() {
        let gate = RateGate::new(RateGateConfig::default());
        gate.penalize(Duration::from_secs(1));
        assert_eq!(gate.current_tokens(), 0.0);
    }
}
