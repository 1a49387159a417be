//! Per-caller token-bucket rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket per caller key, refilled continuously over a one-minute
/// window.
pub struct RateLimiter {
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            capacity: f64::from(per_minute.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `key`; `false` means the caller is over budget.
    pub fn allow(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.capacity / 60.0).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_up_to_capacity() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.allow("caller-a"));
        }
        assert!(!limiter.allow("caller-a"));
    }

    #[test]
    fn test_callers_are_independent() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow("caller-a"));
        assert!(!limiter.allow("caller-a"));
        assert!(limiter.allow("caller-b"));
    }
}
