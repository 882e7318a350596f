//! Token-bucket rate limiting for outbound provider requests.
//!
//! Each adapter owns one bucket sized from its `rate_limit_per_minute`.
//! Refill and consume happen under one lock so two callers can never spend
//! the same token; the lock is released while a caller waits.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Per-source token bucket.
///
/// - `capacity` tokens at most; refilled continuously at `capacity / window`.
/// - `acquire()` takes one token. With none available it sleeps exactly
///   `window / capacity` once, refills, and takes the token; the wait is a
///   function of configuration only, never of queue length.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    window: Duration,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let window = if window.is_zero() {
            Duration::from_secs(1)
        } else {
            window
        };
        Self {
            capacity,
            window,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket for a `requests per minute` budget.
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }

    /// Wait applied when the bucket is empty.
    pub fn wait_time(&self) -> Duration {
        self.window.div_f64(self.capacity)
    }

    /// Take one token, waiting at most [`wait_time`](Self::wait_time).
    pub async fn acquire(&self) {
        if self.try_acquire() {
            return;
        }
        tokio::time::sleep(self.wait_time()).await;
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
    }

    /// Take one token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Currently available tokens (after refill).
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let added = elapsed.as_secs_f64() / self.window.as_secs_f64() * self.capacity;
        bucket.tokens = (bucket.tokens + added).min(self.capacity);
        bucket.last_refill = now;
    }
}
