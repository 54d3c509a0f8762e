//! Token-bucket rate limiter, one bucket per provider.
//!
//! Capacity is `burst` tokens; refill is continuous at
//! `requests_per_second` tokens per second, so fractional capacity
//! accumulates between calls. Every dispatch handle for a provider shares
//! that provider's bucket through an `Arc`.
//!
//! `acquire` deducts a token only at the instant it is granted. A waiter
//! that is cancelled mid-sleep therefore consumes nothing and leaves no
//! state behind.

use crate::models::RateBudget;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket for a single provider.
#[derive(Debug)]
pub struct TokenBucket {
    budget: RateBudget,
    state: Mutex<BucketState>,
    total_acquired: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    pub fn new(budget: RateBudget) -> Self {
        Self {
            budget,
            state: Mutex::new(BucketState {
                tokens: budget.burst as f64,
                last_refill: Instant::now(),
            }),
            total_acquired: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    pub fn budget(&self) -> RateBudget {
        self.budget
    }

    /// Wait for one token and consume it.
    ///
    /// Blocks only the calling task. As long as the refill rate is
    /// positive this never starves; ordering under contention is
    /// best-effort. The state lock is never held across an await, so
    /// dropping this future while it sleeps has no side effects.
    pub async fn acquire(&self) {
        let started = Instant::now();

        loop {
            let wait = {
                let mut state = self.state.lock().expect("bucket state lock poisoned");
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(
                        deficit / self.budget.requests_per_second,
                    ))
                }
            };

            match wait {
                None => {
                    let waited = started.elapsed();
                    if !waited.is_zero() {
                        debug!(wait_ms = waited.as_millis() as u64, "rate limit wait");
                        self.total_wait_ms
                            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
                    }
                    self.total_acquired.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }

    /// Consume a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("bucket state lock poisoned");
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.budget.requests_per_second)
            .min(self.budget.burst as f64);
        state.last_refill = now;
    }

    pub fn stats(&self) -> BucketStats {
        BucketStats {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Cumulative limiter counters for one provider.
#[derive(Debug, Clone)]
pub struct BucketStats {
    pub total_acquired: u64,
    pub total_wait_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bucket(rps: f64, burst: u32) -> Arc<TokenBucket> {
        Arc::new(TokenBucket::new(RateBudget {
            requests_per_second: rps,
            burst,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_grants_immediately_and_no_more() {
        let bucket = bucket(1.0, 3);

        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn draining_burst_plus_k_takes_at_least_k_over_r() {
        // r = 2/s, b = 1: five acquires need 4 extra tokens, so >= 2s
        let bucket = bucket(2.0, 1);
        let start = Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let bucket = Arc::clone(&bucket);
            tasks.push(tokio::spawn(async move { bucket.acquire().await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(bucket.stats().total_acquired, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_continuous_not_stepped() {
        let bucket = bucket(2.0, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        // Half a token after 250ms, a full one after 500ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!bucket.try_acquire());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_consumes_nothing() {
        let bucket = bucket(1.0, 1);
        bucket.acquire().await;

        // Abandon a waiter before its token arrives
        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), bucket.acquire()).await;
        assert!(cancelled.is_err());

        // The refilled token is still available to the next caller
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire());
        assert_eq!(bucket.stats().total_acquired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_rates_refill_slowly() {
        let bucket = bucket(0.5, 1);
        assert!(bucket.try_acquire());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!bucket.try_acquire());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire());
    }
}
