use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Default number of entries retained by entity caches.
pub const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity cache with insertion-order eviction.
///
/// Once the capacity is exceeded the oldest-inserted entry is dropped.
/// Reads and overwrites do not refresh an entry's position, so this is a
/// plain FIFO bound rather than an LRU.
pub struct BoundedCache<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or overwrite. A new key goes to the back of the insertion
    /// queue; an existing key keeps its original position.
    pub fn put(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Eq + Hash + Clone, V> Default for BoundedCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let mut cache = BoundedCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), None);
    }

    #[test]
    fn test_evicts_oldest_inserted() {
        let mut cache = BoundedCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        cache.put("d", 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"d"), Some(&4));
    }

    #[test]
    fn test_reads_do_not_refresh_recency() {
        let mut cache = BoundedCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        // Reading "a" must not save it from eviction.
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.put("c", 3);

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn test_overwrite_keeps_insertion_position() {
        let mut cache = BoundedCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        assert_eq!(cache.len(), 2);
        // "a" is still oldest, so the next insert evicts it.
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
    }

    #[test]
    fn test_retains_capacity_most_recent_inserts() {
        let mut cache = BoundedCache::new(5);
        for i in 0..20 {
            cache.put(i, i * 2);
        }
        assert_eq!(cache.len(), 5);
        for i in 0..15 {
            assert_eq!(cache.get(&i), None);
        }
        for i in 15..20 {
            assert_eq!(cache.get(&i), Some(&(i * 2)));
        }
    }
}
