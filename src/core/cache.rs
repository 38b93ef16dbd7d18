use crate::domain::model::Record;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    stored_at: Instant,
    records: Vec<Record>,
}

/// 查詢結果的短期記憶體快取
pub struct QueryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(&self, key: &str) -> Option<Vec<Record>> {
        if !self.is_enabled() {
            return None;
        }

        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(key)
            .map(|entry| entry.stored_at.elapsed() < self.ttl)?;

        if fresh {
            entries.get(key).map(|entry| entry.records.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    pub fn insert(&self, key: impl Into<String>, records: Vec<Record>) {
        if !self.is_enabled() {
            return;
        }

        if let Ok(mut entries) = self.entries.lock() {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
            entries.insert(
                key.into(),
                CacheEntry {
                    stored_at: Instant::now(),
                    records,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<Record> {
        vec![Record::from_json("r1", json!({"weight": 1.0}))]
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = QueryCache::new(Duration::from_secs(60));
        cache.insert("measurements limit 10", sample());

        assert_eq!(cache.get("measurements limit 10"), Some(sample()));
        assert_eq!(cache.get("measurements limit 20"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = QueryCache::new(Duration::from_millis(20));
        cache.insert("q", sample());
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("q"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = QueryCache::disabled();
        cache.insert("q", sample());

        assert!(!cache.is_enabled());
        assert_eq!(cache.get("q"), None);
        assert!(cache.is_empty());
    }
}
