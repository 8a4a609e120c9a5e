// ABOUTME: Instance-owned TTL cache with a capacity bound.
// ABOUTME: Replaces the ambient module-level query cache; inject one per client.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CacheSlot<V> {
    value: V,
    stored_at: Instant,
}

/// A small cache keyed by query with a fixed TTL and oldest-entry eviction
/// once the capacity bound is hit. Owned by whoever constructs it, so two
/// client instances never share results.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<K, CacheSlot<V>>,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    /// Fetch a live entry; expired entries are dropped on read.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(slot) => now.duration_since(slot.stored_at) >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|slot| &slot.value)
    }

    pub fn insert(&mut self, key: K, value: V, now: Instant) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.stored_at)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, CacheSlot { value, stored_at: now });
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, slot| now.duration_since(slot.stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let mut cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(30), 8);
        let now = Instant::now();
        cache.insert("q".to_string(), 7, now);
        assert_eq!(cache.get(&"q".to_string(), now + Duration::from_secs(10)), Some(&7));
    }

    #[test]
    fn test_expired_entry_dropped_on_read() {
        let mut cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(30), 8);
        let now = Instant::now();
        cache.insert("q".to_string(), 7, now);
        assert_eq!(cache.get(&"q".to_string(), now + Duration::from_secs(30)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.insert("a", 1, now);
        cache.insert("b", 2, now + Duration::from_secs(1));
        cache.insert("c", 3, now + Duration::from_secs(2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a", now + Duration::from_secs(3)), None);
        assert_eq!(cache.get(&"c", now + Duration::from_secs(3)), Some(&3));
    }

    #[test]
    fn test_reinsert_refreshes_instead_of_evicting() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.insert("a", 1, now);
        cache.insert("b", 2, now);
        cache.insert("a", 10, now + Duration::from_secs(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a", now + Duration::from_secs(2)), Some(&10));
    }

    #[test]
    fn test_purge_expired() {
        let mut cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(10), 8);
        let now = Instant::now();
        cache.insert("old", 1, now);
        cache.insert("new", 2, now + Duration::from_secs(9));
        assert_eq!(cache.purge_expired(now + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
    }
}
