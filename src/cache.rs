// src/cache.rs
//! Short-TTL cache for the unfiltered first page of signals. Invalidated
//! whenever a new signal lands.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value as Json;

const TTL: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct PageCache {
    // (shape key, rendered response, stored at)
    slot: Mutex<Option<(String, Json, Instant)>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Json> {
        let guard = self.slot.lock().expect("cache lock");
        match guard.as_ref() {
            Some((k, v, at)) if k == key && at.elapsed() < TTL => Some(v.clone()),
            _ => None,
        }
    }

    pub fn put(&self, key: &str, value: Json) {
        let mut guard = self.slot.lock().expect("cache lock");
        *guard = Some((key.to_string(), value, Instant::now()));
    }

    pub fn invalidate(&self) {
        let mut guard = self.slot.lock().expect("cache lock");
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_then_invalidate() {
        let cache = PageCache::new();
        assert!(cache.get("p1").is_none());
        cache.put("p1", json!({"total": 3}));
        assert_eq!(cache.get("p1").unwrap()["total"], 3);
        assert!(cache.get("p2").is_none(), "different shape misses");
        cache.invalidate();
        assert!(cache.get("p1").is_none());
    }
}
