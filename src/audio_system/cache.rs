/// Decoded buffer cache with least-recently-used eviction
use std::collections::HashMap;

use super::decode::DecodedBuffer;

/// Default number of decoded buffers kept in memory
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
struct CacheEntry {
    buffer: DecodedBuffer,
    last_access: u64,
}

/// Key → decoded buffer, bounded by entry count.
///
/// Access order is a logical clock rather than wall time, so two touches in the same
/// millisecond still order correctly.
#[derive(Debug)]
pub struct BufferCache {
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

impl BufferCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up a buffer and mark it as recently used
    pub fn get(&mut self, key: &str) -> Option<DecodedBuffer> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_access = tick;
        Some(entry.buffer.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a buffer, evicting the least recently used entry when full.
    ///
    /// Returns the evicted key, if any.
    pub fn insert(&mut self, key: &str, buffer: DecodedBuffer) -> Option<String> {
        let last_access = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.buffer = buffer;
            entry.last_access = last_access;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = &oldest {
                self.entries.remove(oldest);
                tracing::debug!("Evicted {} from buffer cache", oldest);
            }
            oldest
        } else {
            None
        };

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                buffer,
                last_access,
            },
        );
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for BufferCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> DecodedBuffer {
        DecodedBuffer::new(vec![0.0; 10], 1, 1_000)
    }

    #[test]
    fn test_get_missing() {
        let mut cache = BufferCache::default();
        assert!(cache.get("apple").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut cache = BufferCache::new(DEFAULT_CAPACITY);
        for i in 0..(DEFAULT_CAPACITY * 2) {
            cache.insert(&format!("key{}", i), buffer());
            assert!(cache.len() <= DEFAULT_CAPACITY);
        }
        assert_eq!(cache.len(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_51st_key_evicts_least_recently_accessed() {
        let mut cache = BufferCache::new(50);
        for i in 0..50 {
            cache.insert(&format!("key{}", i), buffer());
        }
        // key0 is the oldest insert, but touching it makes key1 the LRU entry
        assert!(cache.get("key0").is_some());

        let evicted = cache.insert("key50", buffer());
        assert_eq!(evicted.as_deref(), Some("key1"));
        assert!(cache.contains("key0"));
        assert!(!cache.contains("key1"));
        assert_eq!(cache.len(), 50);
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = BufferCache::new(2);
        cache.insert("a", buffer());
        cache.insert("b", buffer());
        assert_eq!(cache.insert("a", buffer()), None);
        assert_eq!(cache.len(), 2);
    }
}
