//! Per-IP request rate limiting.
//!
//! A token-bucket per client IP, shared across the router as axum state.
//! Buckets refill continuously at the sustained rate up to the burst
//! capacity; a background task periodically evicts buckets for IPs that have
//! gone quiet.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_seen: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_seen).as_secs_f64();
        self.last_seen = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    /// `rate` requests per second sustained, bursting up to `capacity`.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    /// Take one token for `ip`.  Returns `false` when the bucket is drained.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::full(self.capacity))
            .try_consume(self.rate, self.capacity)
    }

    /// Drop buckets that have been idle for longer than `idle_secs`.
    pub async fn purge_stale(&self, idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, b| b.last_seen.elapsed().as_secs_f64() <= idle_secs);
        let evicted = before - buckets.len();
        if evicted > 0 {
            tracing::debug!(evicted, "purged idle rate-limit buckets");
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !limiter.check(addr.ip()).await {
        warn!(ip = %addr.ip(), "rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[tokio::test]
    async fn burst_then_denied() {
        // Effectively no refill during the test.
        let limiter = RateLimiter::new(0.0001, 3.0);

        for _ in 0..3 {
            assert!(limiter.check(ip(1)).await);
        }
        assert!(!limiter.check(ip(1)).await);

        // Other IPs are unaffected.
        assert!(limiter.check(ip(2)).await);
    }

    #[tokio::test]
    async fn purge_evicts_idle_buckets() {
        let limiter = RateLimiter::new(10.0, 30.0);
        limiter.check(ip(1)).await;
        limiter.check(ip(2)).await;

        limiter.purge_stale(-1.0).await;
        assert_eq!(limiter.buckets.lock().await.len(), 0);
    }
}
