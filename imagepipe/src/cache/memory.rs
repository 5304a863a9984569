//! In-memory image cache with LRU eviction.

use crate::cache::CacheStats;
use crate::image::ImageContainer;
use crate::keys::ImageCacheKey;
use crate::traits::ImageCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

struct CacheEntry {
    container: ImageContainer,
    cost: usize,
    /// Logical clock value of the last access
    last_accessed: u64,
}

struct State {
    entries: HashMap<ImageCacheKey, CacheEntry>,
    total_cost: usize,
    clock: u64,
    stats: CacheStats,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &ImageCacheKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_cost -= entry.cost;
                true
            }
            None => false,
        }
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());

        match oldest {
            Some(key) => {
                self.remove(&key);
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }

    fn refresh_stats(&mut self) {
        let (cost, count) = (self.total_cost, self.entries.len());
        self.stats.update_size(cost, count);
    }
}

/// Decoded images kept in memory, bounded by total cost and entry count.
///
/// Cost is the image's pixel count times four. An image costing more than
/// the whole budget is never stored.
pub struct MemoryImageCache {
    state: Mutex<State>,
    max_cost: usize,
    max_entries: usize,
}

impl MemoryImageCache {
    pub fn new(max_cost: usize, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                total_cost: 0,
                clock: 0,
                stats: CacheStats::new(),
            }),
            max_cost,
            max_entries,
        }
    }

    pub fn contains(&self, key: &ImageCacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn total_cost(&self) -> usize {
        self.state.lock().total_cost
    }

    pub fn max_cost(&self) -> usize {
        self.max_cost
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }
}

impl ImageCache for MemoryImageCache {
    fn get(&self, key: &ImageCacheKey) -> Option<ImageContainer> {
        let mut state = self.state.lock();
        let now = state.tick();

        let found = state.entries.get_mut(key).map(|entry| {
            entry.last_accessed = now;
            entry.container.clone()
        });
        state.stats.record_lookup(found.is_some());
        found
    }

    fn insert(&self, key: ImageCacheKey, container: ImageContainer) {
        let cost = container.cost();
        if cost > self.max_cost || self.max_entries == 0 {
            debug!(key = %key, cost, "Image too large for memory cache");
            return;
        }

        let mut state = self.state.lock();
        state.remove(&key);

        while state.total_cost + cost > self.max_cost || state.entries.len() >= self.max_entries {
            if !state.evict_oldest() {
                break;
            }
        }

        let now = state.tick();
        state.entries.insert(
            key,
            CacheEntry {
                container,
                cost,
                last_accessed: now,
            },
        );
        state.total_cost += cost;
        state.stats.writes += 1;
        state.refresh_stats();
    }

    fn remove(&self, key: &ImageCacheKey) {
        let mut state = self.state.lock();
        state.remove(key);
        state.refresh_stats();
    }

    fn remove_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_cost = 0;
        state.refresh_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn container(side: u32) -> ImageContainer {
        ImageContainer::new(DynamicImage::new_rgba8(side, side))
    }

    fn key(name: &str) -> ImageCacheKey {
        ImageCacheKey::new(name, vec![])
    }

    #[test]
    fn test_get_miss_then_hit() {
        let cache = MemoryImageCache::new(1024 * 1024, 10);
        assert!(cache.get(&key("a")).is_none());

        cache.insert(key("a"), container(4));
        let hit = cache.get(&key("a")).unwrap();
        assert_eq!(hit.width(), 4);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size_bytes, 64);
    }

    #[test]
    fn test_evicts_least_recently_used_by_cost() {
        // Room for exactly two 4x4 images (64 bytes each).
        let cache = MemoryImageCache::new(128, 10);
        cache.insert(key("a"), container(4));
        cache.insert(key("b"), container(4));

        // Touch "a" so "b" becomes the oldest.
        cache.get(&key("a"));
        cache.insert(key("c"), container(4));

        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.total_cost(), 128);
    }

    #[test]
    fn test_evicts_by_entry_count() {
        let cache = MemoryImageCache::new(usize::MAX, 2);
        cache.insert(key("a"), container(1));
        cache.insert(key("b"), container(1));
        cache.insert(key("c"), container(1));

        assert_eq!(cache.entry_count(), 2);
        assert!(!cache.contains(&key("a")));
    }

    #[test]
    fn test_oversized_image_not_stored() {
        let cache = MemoryImageCache::new(10, 10);
        cache.insert(key("big"), container(4));
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_replace_same_key_keeps_cost_consistent() {
        let cache = MemoryImageCache::new(1024, 10);
        cache.insert(key("a"), container(4));
        cache.insert(key("a"), container(2));
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.total_cost(), 16);
    }

    #[test]
    fn test_remove_and_remove_all() {
        let cache = MemoryImageCache::new(1024, 10);
        cache.insert(key("a"), container(2));
        cache.insert(key("b"), container(2));

        cache.remove(&key("a"));
        assert!(!cache.contains(&key("a")));
        assert_eq!(cache.total_cost(), 16);

        cache.remove_all();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_cost(), 0);
    }
}
