// src/ratelimit.rs
//! Per-client sliding-window rate limiter for the read API. Ingest paths
//! are deliberately not limited; webhooks are trusted.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    window: Duration,
    limit: usize,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            window,
            limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// The read-API default: 60 requests per minute per client.
    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Record one request for `key`. Returns false once the window is full.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().expect("rate limiter lock");
        let entry = hits.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.limit {
            return false;
        }
        entry.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_enforced_per_key() {
        let rl = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(rl.check_at("a", now));
        assert!(rl.check_at("a", now));
        assert!(rl.check_at("a", now));
        assert!(!rl.check_at("a", now));
        // Other clients are unaffected.
        assert!(rl.check_at("b", now));
    }

    #[test]
    fn window_slides() {
        let rl = RateLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(rl.check_at("a", t0));
        assert!(rl.check_at("a", t0));
        assert!(!rl.check_at("a", t0));
        let t1 = t0 + Duration::from_secs(61);
        assert!(rl.check_at("a", t1), "old hits expired");
    }
}
