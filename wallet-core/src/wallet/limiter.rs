//! Per-endpoint request throttling
//!
//! Two gates per endpoint: a token bucket (burst shaping, linear
//! refill) and a sliding log (hard ceiling per window). A request is
//! admitted only when both agree; waiters queue FIFO behind the mutex.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limit configuration, shared by every endpoint
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// hard ceiling of requests per window
    pub max_requests: u32,
    pub time_window_seconds: u64,
    /// bucket capacity; refills at `burst_capacity / time_window` per second
    pub burst_capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            time_window_seconds: 60,
            burst_capacity: 10,
        }
    }
}

/// Point-in-time view of one endpoint's limiter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterStatus {
    pub tokens_available: f64,
    pub requests_used: u32,
    pub percent_used: f64,
    pub is_limited: bool,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    log: VecDeque<Instant>,
}

impl Bucket {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: config.burst_capacity as f64,
            refilled_at: now,
            log: VecDeque::new(),
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        let rate = config.burst_capacity as f64 / config.time_window_seconds as f64;
        self.tokens = (self.tokens + elapsed * rate).min(config.burst_capacity as f64);
        self.refilled_at = now;

        let window = Duration::from_secs(config.time_window_seconds);
        while let Some(front) = self.log.front() {
            if now.duration_since(*front) >= window {
                self.log.pop_front();
            } else {
                break;
            }
        }
    }

    fn admissible(&self) -> bool {
        self.tokens >= 1.0
    }

    fn take(&mut self, now: Instant) {
        self.tokens -= 1.0;
        self.log.push_back(now);
    }

    /// duration until either gate could open again
    fn retry_after(&self, config: &RateLimitConfig, now: Instant) -> Duration {
        let rate = config.burst_capacity as f64 / config.time_window_seconds as f64;
        let token_wait = if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / rate)
        };

        let log_wait = if (self.log.len() as u32) < config.max_requests {
            Duration::ZERO
        } else {
            let window = Duration::from_secs(config.time_window_seconds);
            self.log
                .front()
                .map(|f| window.saturating_sub(now.duration_since(*f)))
                .unwrap_or(Duration::ZERO)
        };

        token_wait.max(log_wait).max(Duration::from_millis(10))
    }
}

/// Per-endpoint token bucket + sliding window limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<BTreeMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Non-blocking probe: admit now or not
    pub async fn try_acquire(&self, endpoint: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(endpoint.to_owned())
            .or_insert_with(|| Bucket::new(&self.config, now));
        bucket.refill(&self.config, now);

        let ok = bucket.admissible() && (bucket.log.len() as u32) < self.config.max_requests;
        if ok {
            bucket.take(now);
        }
        ok
    }

    /// Wait for admission. FIFO: waiters queue on the bucket lock.
    pub async fn acquire(&self, endpoint: &str) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(endpoint.to_owned())
                    .or_insert_with(|| Bucket::new(&self.config, now));
                bucket.refill(&self.config, now);

                if bucket.admissible() && (bucket.log.len() as u32) < self.config.max_requests {
                    bucket.take(now);
                    return;
                }
                bucket.retry_after(&self.config, now)
            };

            debug!("rate limited, sleeping {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn status(&self, endpoint: &str) -> LimiterStatus {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(endpoint.to_owned())
            .or_insert_with(|| Bucket::new(&self.config, now));
        bucket.refill(&self.config, now);

        let requests_used = bucket.log.len() as u32;
        LimiterStatus {
            tokens_available: bucket.tokens,
            requests_used,
            percent_used: requests_used as f64 / self.config.max_requests as f64 * 100.0,
            is_limited: !bucket.admissible() || requests_used >= self.config.max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: u32, window: u64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: max,
            time_window_seconds: window,
            burst_capacity: burst,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_deny() {
        let limiter = RateLimiter::new(config(3, 60, 3));

        for _ in 0..3 {
            assert!(limiter.try_acquire("/v1/swap").await);
        }
        // fourth is denied
        assert!(!limiter.try_acquire("/v1/swap").await);

        let status = limiter.status("/v1/swap").await;
        assert!(status.is_limited);
        assert_eq!(status.requests_used, 3);
        assert_eq!(status.percent_used, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_refill_without_window() {
        let limiter = RateLimiter::new(config(3, 60, 3));

        for _ in 0..3 {
            assert!(limiter.try_acquire("/v1/swap").await);
        }

        // 20s refills one token, but the sliding window still holds
        // all three requests; the token alone is not enough
        tokio::time::advance(Duration::from_secs(20)).await;
        let status = limiter.status("/v1/swap").await;
        assert!(status.tokens_available >= 1.0);
        assert!(!limiter.try_acquire("/v1/swap").await);

        // once the window has passed everything opens up again
        tokio::time::advance(Duration::from_secs(41)).await;
        assert!(limiter.try_acquire("/v1/swap").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_independent() {
        let limiter = RateLimiter::new(config(1, 60, 1));

        assert!(limiter.try_acquire("/v1/swap").await);
        assert!(!limiter.try_acquire("/v1/swap").await);
        // other endpoint unaffected
        assert!(limiter.try_acquire("/v1/info").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits() {
        let limiter = std::sync::Arc::new(RateLimiter::new(config(2, 10, 2)));

        limiter.acquire("/v1/melt/bolt11").await;
        limiter.acquire("/v1/melt/bolt11").await;

        let l = limiter.clone();
        let waiter = tokio::spawn(async move {
            l.acquire("/v1/melt/bolt11").await;
        });

        // let the waiter park, then roll time past the window
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tokio::time::advance(Duration::from_secs(11)).await;
        waiter.await.unwrap();
    }
}
