/// Synthesized audio cache
///
/// Bounded by entry count; the oldest insert goes first. Hits do not refresh an
/// entry's position.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default number of synthesized phrases kept
pub const DEFAULT_CAPACITY: usize = 50;

/// (language code, text)
pub type VoiceKey = (String, String);

#[derive(Debug)]
pub struct VoiceCache {
    capacity: usize,
    entries: HashMap<VoiceKey, Arc<Vec<u8>>>,
    order: VecDeque<VoiceKey>,
}

impl VoiceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn key(language: &str, text: &str) -> VoiceKey {
        (language.to_string(), text.trim().to_string())
    }

    pub fn get(&self, key: &VoiceKey) -> Option<Arc<Vec<u8>>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: VoiceKey, bytes: Vec<u8>) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, Arc::new(bytes));
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, Arc::new(bytes));
    }

    pub fn remove(&mut self, key: &VoiceKey) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }
        self.order.retain(|k| k != key);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for VoiceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_insert_evicted_even_if_read() {
        let mut cache = VoiceCache::new(2);
        cache.insert(VoiceCache::key("en", "dog"), vec![1]);
        cache.insert(VoiceCache::key("en", "cat"), vec![2]);
        assert!(cache.get(&VoiceCache::key("en", "dog")).is_some());

        cache.insert(VoiceCache::key("en", "bird"), vec![3]);
        assert!(cache.get(&VoiceCache::key("en", "dog")).is_none());
        assert!(cache.get(&VoiceCache::key("en", "cat")).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_language_is_part_of_key() {
        let mut cache = VoiceCache::default();
        cache.insert(VoiceCache::key("en", "hello"), vec![1]);
        assert!(cache.get(&VoiceCache::key("es", "hello")).is_none());
        assert!(cache.get(&VoiceCache::key("en", " hello ")).is_some());
    }
}
