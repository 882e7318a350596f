// tests/rate_limiter.rs
//
// Token bucket timing under a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crypto_news_ingest::RateLimiter;

#[tokio::test(start_paused = true)]
async fn third_call_in_a_two_per_second_bucket_waits_half_a_second() {
    let rl = RateLimiter::new(2, Duration::from_secs(1));
    let t0 = Instant::now();
    rl.acquire().await;
    rl.acquire().await;
    assert_eq!(t0.elapsed(), Duration::ZERO);

    rl.acquire().await;
    let waited = t0.elapsed();
    assert!(waited >= Duration::from_millis(500), "waited {waited:?}");
    assert!(waited < Duration::from_millis(600), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_each_wait_at_most_one_interval() {
    let rl = Arc::new(RateLimiter::per_minute(6));
    for _ in 0..6 {
        assert!(rl.try_acquire());
    }
    assert_eq!(rl.wait_time(), Duration::from_secs(10));

    let t0 = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let rl = rl.clone();
            tokio::spawn(async move { rl.acquire().await })
        })
        .collect();
    for h in handles {
        h.await.unwrap();
    }
    assert!(t0.elapsed() <= Duration::from_secs(10));
    assert!(rl.available() >= 0.0);
}

#[tokio::test(start_paused = true)]
async fn zero_capacity_is_treated_as_one() {
    let rl = RateLimiter::new(0, Duration::from_secs(4));
    assert!(rl.try_acquire());
    assert!(!rl.try_acquire());
    assert_eq!(rl.wait_time(), Duration::from_secs(4));
}
