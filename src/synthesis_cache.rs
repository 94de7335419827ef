//! Synthesis Cache: `(text, language_code) -> audio bytes`, bounded at a
//! fixed capacity with FIFO eviction so repeated phrases in a session don't
//! re-pay TTS latency (§4.6).

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    text: String,
    language_code: String,
}

struct Inner {
    capacity: usize,
    entries: HashMap<CacheKey, Arc<Vec<u8>>>,
    order: VecDeque<CacheKey>,
}

/// Shared across the process; reads never block writers for long (a single
/// `parking_lot::Mutex` guards the small map, held only for the lookup/insert
/// itself, never across a synthesis call).
pub struct SynthesisCache {
    inner: Mutex<Inner>,
}

impl SynthesisCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, text: &str, language_code: &str) -> Option<Arc<Vec<u8>>> {
        let key = CacheKey {
            text: text.to_string(),
            language_code: language_code.to_string(),
        };
        self.inner.lock().entries.get(&key).cloned()
    }

    /// Inserts `audio` under `(text, language_code)`, evicting the oldest
    /// entry first if the cache is at capacity. A duplicate key overwrites
    /// in place without disturbing eviction order.
    pub fn put(&self, text: &str, language_code: &str, audio: Arc<Vec<u8>>) {
        let key = CacheKey {
            text: text.to_string(),
            language_code: language_code.to_string(),
        };
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            inner.entries.insert(key, audio);
            return;
        }
        if inner.entries.len() >= inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, audio);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = SynthesisCache::new(10);
        assert!(cache.get("hello", "es-ES").is_none());
        cache.put("hello", "es-ES", Arc::new(vec![1, 2, 3]));
        assert_eq!(cache.get("hello", "es-ES").unwrap().as_ref(), &vec![1, 2, 3]);
    }

    #[test]
    fn distinguishes_by_language_code() {
        let cache = SynthesisCache::new(10);
        cache.put("hello", "es-ES", Arc::new(vec![1]));
        cache.put("hello", "fr-FR", Arc::new(vec![2]));
        assert_eq!(cache.get("hello", "es-ES").unwrap().as_ref(), &vec![1]);
        assert_eq!(cache.get("hello", "fr-FR").unwrap().as_ref(), &vec![2]);
    }

    #[test]
    fn evicts_oldest_entry_at_capacity() {
        let cache = SynthesisCache::new(2);
        cache.put("a", "en-US", Arc::new(vec![1]));
        cache.put("b", "en-US", Arc::new(vec![2]));
        cache.put("c", "en-US", Arc::new(vec![3]));
        assert!(cache.get("a", "en-US").is_none());
        assert!(cache.get("b", "en-US").is_some());
        assert!(cache.get("c", "en-US").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let cache = SynthesisCache::new(2);
        cache.put("a", "en-US", Arc::new(vec![1]));
        cache.put("b", "en-US", Arc::new(vec![2]));
        cache.put("a", "en-US", Arc::new(vec![9]));
        assert_eq!(cache.get("a", "en-US").unwrap().as_ref(), &vec![9]);
        assert!(cache.get("b", "en-US").is_some());
        assert_eq!(cache.len(), 2);
    }
}
