//! Bounded LRU Cache
//!
//! Access-ordered cache backing the time-sliced root's sub-tree store.
//! Capacity is small (20 slices by default), so entries live in a plain
//! vector ordered least- to most-recently used. `put` is idempotent per
//! key: the first writer wins and later writers get the surviving value
//! back. Callers serialize access with a mutex and keep sub-tree builds
//! outside the critical section.

/// Access-ordered bounded cache; least recently used entries evict first
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    /// Least recently used first, most recently used last
    entries: Vec<(K, V)>,
}

impl<K: Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> LruCache<K, V> {
        LruCache {
            capacity: capacity.max(1),
            entries: Vec::new(),
        }
    }

    /// Look up a key, marking it most recently used
    pub fn get(&mut self, key: &K) -> Option<V> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(position);
        let value = entry.1.clone();
        self.entries.push(entry);
        Some(value)
    }

    /// Insert if absent, returning the value now cached under the key.
    /// A present key keeps its existing value (first writer wins) and is
    /// marked most recently used.
    pub fn put(&mut self, key: K, value: V) -> V {
        if let Some(existing) = self.get(&key) {
            return existing;
        }
        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
        }
        self.entries.push((key, value.clone()));
        value
    }

    /// Snapshot of the keys, least recently used first
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
