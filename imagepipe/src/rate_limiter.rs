//! Token bucket that paces the start of network fetches.
//!
//! The bucket holds at most `capacity` tokens and gains one token every
//! `refill_interval`. Each fetch takes one token before it may start. When
//! the bucket is empty, callers wait in submission order: the bucket sits
//! behind a fair (FIFO) async mutex and the waiter at the head holds the
//! lock while it sleeps until the next token is due.
//!
//! Dropping an `acquire` future before it resolves gives up the place in
//! the queue without consuming a token.
//!
//! ```text
//! capacity = 1, refill = 100ms, three simultaneous callers
//!
//!   t=0ms    #1 admitted (bucket full)
//!   t=100ms  #2 admitted
//!   t=200ms  #3 admitted
//! ```

use crate::config::RateLimitConfig;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// FIFO token bucket.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_interval: Duration,
    bucket: Mutex<Bucket>,
    admitted: AtomicU64,
    waiting: AtomicUsize,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, interval: Duration) {
        let elapsed = now.saturating_duration_since(self.updated);
        self.tokens = (self.tokens + elapsed.as_secs_f64() / interval.as_secs_f64()).min(capacity);
        self.updated = now;
    }
}

impl RateLimiter {
    /// Creates a full bucket.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 or `refill_interval` is zero.
    pub fn new(capacity: usize, refill_interval: Duration) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(!refill_interval.is_zero(), "refill_interval must be > 0");

        info!(
            capacity,
            refill_interval_ms = refill_interval.as_secs_f64() * 1000.0,
            "Rate limiter created"
        );

        Self {
            capacity: capacity as f64,
            refill_interval,
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                updated: Instant::now(),
            }),
            admitted: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity(), config.refill_interval())
    }

    /// Waits for admission.
    pub async fn acquire(&self) {
        let _waiting = WaitingGuard::new(&self.waiting);

        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now(), self.capacity, self.refill_interval);

        if bucket.tokens < 1.0 {
            let wait = self.refill_interval.mul_f64(1.0 - bucket.tokens);
            debug!(wait_ms = wait.as_millis() as u64, "Rate limiter queueing admission");
            tokio::time::sleep(wait).await;
            bucket.refill(Instant::now(), self.capacity, self.refill_interval);
            // The sleep was sized to earn exactly one token.
            bucket.tokens = bucket.tokens.max(1.0);
        }

        bucket.tokens -= 1.0;
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Total admissions granted.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Callers currently queued or sleeping for a token.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn millis_since(start: Instant) -> u128 {
        Instant::now().duration_since(start).as_millis()
    }

    #[tokio::test(start_paused = true)]
    async fn test_admissions_are_spaced_by_refill_interval() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_millis(100)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                millis_since(start)
            }));
            // Fix submission order.
            tokio::task::yield_now().await;
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }

        assert_eq!(times[0], 0);
        assert!((100..=101).contains(&times[1]), "second at {}ms", times[1]);
        assert!((200..=202).contains(&times[2]), "third at {}ms", times[2]);
        assert_eq!(limiter.admitted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::new(5, Duration::from_millis(50));
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(millis_since(start), 0);

        limiter.acquire().await;
        assert!((50..=51).contains(&millis_since(start)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_while_idle() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(millis_since(start), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_does_not_consume_token() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_millis(100)));
        limiter.acquire().await;

        let queued = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(limiter.waiting(), 1);

        queued.abort();
        let _ = queued.await;
        assert_eq!(limiter.waiting(), 0);

        let start = Instant::now();
        limiter.acquire().await;
        assert!(millis_since(start) <= 101);
        assert_eq!(limiter.admitted(), 2);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_zero_capacity_panics() {
        RateLimiter::new(0, Duration::from_millis(1));
    }
}
