use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub headers: RateLimitHeaders,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client token buckets for the deep-search endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    burst: u32,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self {
            per_minute: per_minute.max(1),
            burst: burst.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.per_minute) / 60.0
    }

    fn capacity(&self) -> f64 {
        f64::from(self.burst)
    }

    /// Time for an empty bucket to fill up again; buckets idle this long are
    /// indistinguishable from new ones.
    fn idle_after(&self) -> Duration {
        Duration::from_secs_f64(self.capacity() / self.refill_per_sec())
    }

    pub async fn check(&self, client: &str) -> RateLimitDecision {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: &str, now: Instant) -> RateLimitDecision {
        let refill_per_sec = self.refill_per_sec();
        let capacity = self.capacity();

        let mut guard = self.buckets.lock().await;
        if guard.len() >= PRUNE_THRESHOLD {
            let idle_after = self.idle_after();
            guard.retain(|_, bucket| now.duration_since(bucket.last_refill) < idle_after);
        }

        let bucket = guard.entry(client.to_string()).or_insert(BucketState {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            let restored = elapsed * refill_per_sec;
            bucket.tokens = (bucket.tokens + restored).min(capacity);
            bucket.last_refill = now;
        }

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        let remaining = bucket.tokens.floor().max(0.0) as u32;
        let deficit = (1.0 - bucket.tokens).max(0.0);
        let reset_seconds = if deficit <= 0.0 {
            0
        } else {
            (deficit / refill_per_sec).ceil() as u64
        };

        RateLimitDecision {
            allowed,
            headers: RateLimitHeaders {
                limit: self.per_minute,
                remaining,
                reset_seconds,
            },
        }
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}
