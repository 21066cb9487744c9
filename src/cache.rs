//! Byte-budgeted LRU cache for decoded images.
//!
//! One coarse mutex serializes get/put/evict; decode cost dwarfs the
//! bookkeeping, so finer locking buys nothing. Entries are weighed by an
//! injected sizing function and the budget holds after every mutation.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::decoder::{decoded_image_size, DecodedImage};
use crate::sequence::SourceId;

/// Cache key: source identity plus the generation the decode was made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: SourceId,
    pub generation: u64,
}

impl CacheKey {
    pub fn new(source: SourceId, generation: u64) -> Self {
        Self { source, generation }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.source, self.generation)
    }
}

/// Cache statistics. Hit/miss counts are best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size_bytes: usize,
    pub max_bytes: usize,
    pub num_entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Told about every entry evicted by budget pressure.
///
/// Called on the evicting thread right after the cache lock is released.
/// Implementations must return quickly and must not panic.
pub trait EvictionObserver: Send + Sync {
    fn on_evict(&self);
}

/// Sizing function for cache values.
pub type SizeFn<V> = Arc<dyn Fn(&V) -> usize + Send + Sync>;

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, (V, usize)>,
    current_size: usize,
    max_size: usize,
}

impl<K: Hash + Eq, V> Inner<K, V> {
    /// Pop least recently used entries until within budget.
    fn evict_to_fit(&mut self) -> usize {
        let mut evicted = 0;
        while self.current_size > self.max_size {
            match self.entries.pop_lru() {
                Some((_, (_, size))) => {
                    self.current_size -= size;
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

/// Thread-safe LRU cache bounded by total bytes rather than entry count.
pub struct ByteLruCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    size_of: SizeFn<V>,
    observer: Option<Arc<dyn EvictionObserver>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// The decoded-image cache used by the engine.
pub type ImageCache = ByteLruCache<CacheKey, Arc<DecodedImage>>;

impl ImageCache {
    /// Image cache weighed by [`decoded_image_size`].
    pub fn for_images(max_bytes: usize, observer: Option<Arc<dyn EvictionObserver>>) -> Self {
        let cache = ByteLruCache::new(
            max_bytes,
            Arc::new(|image: &Arc<DecodedImage>| decoded_image_size(image)),
            observer,
        );
        info!(
            "Initialized byte-aware LRU cache with {:.2} MB capacity",
            max_bytes as f64 / (1024.0 * 1024.0)
        );
        cache
    }

    /// Generations currently resident for `source`, for cache-miss diagnostics.
    pub fn generations_for(&self, source: SourceId) -> Vec<u64> {
        let inner = self.inner.lock();
        let mut gens: Vec<u64> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.source == source)
            .map(|(key, _)| key.generation)
            .collect();
        gens.sort_unstable();
        gens
    }
}

impl<K, V> ByteLruCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(max_bytes: usize, size_of: SizeFn<V>, observer: Option<Arc<dyn EvictionObserver>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                current_size: 0,
                max_size: max_bytes,
            }),
            size_of,
            observer,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `key`, promoting it to most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some((value, _)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Like [`get`](Self::get) but leaves the hit and miss counters alone.
    pub fn get_untracked(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.get(key).map(|(value, _)| value.clone())
    }

    /// Insert or replace `key`, then evict least recently used entries
    /// until the budget holds. The new entry itself can be evicted if it
    /// alone exceeds the budget.
    pub fn put(&self, key: K, value: V) {
        let size = (self.size_of)(&value);
        let mut inner = self.inner.lock();
        if let Some((_, old_size)) = inner.entries.put(key.clone(), (value, size)) {
            inner.current_size -= old_size;
        }
        inner.current_size += size;
        let evicted = inner.evict_to_fit();
        debug!(?key, size, current = inner.current_size, evicted, "cached entry");
        drop(inner);
        self.notify_evictions(evicted);
    }

    /// Change the budget, evicting oldest entries if usage now exceeds it.
    pub fn resize(&self, max_bytes: usize) {
        let mut inner = self.inner.lock();
        let old = inner.max_size;
        inner.max_size = max_bytes;
        let evicted = inner.evict_to_fit();
        info!(
            "Resized cache from {:.2} MB to {:.2} MB ({} evicted)",
            old as f64 / (1024.0 * 1024.0),
            max_bytes as f64 / (1024.0 * 1024.0),
            evicted
        );
        drop(inner);
        self.notify_evictions(evicted);
    }

    fn notify_evictions(&self, count: usize) {
        if let Some(observer) = &self.observer {
            for _ in 0..count {
                observer.on_evict();
            }
        }
    }

    /// Membership test. Does not promote and does not count as a hit.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Drop everything. This is an invalidation, not pressure, so the
    /// eviction observer is not told.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_size = 0;
        // Don't reset stats - keep for debugging
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size_bytes: inner.current_size,
            max_bytes: inner.max_size,
            num_entries: inner.entries.len(),
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn current_size(&self) -> usize {
        self.inner.lock().current_size
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Keys from least to most recently used.
    pub fn keys_lru_order(&self) -> Vec<K> {
        let inner = self.inner.lock();
        inner.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sized_cache(max_bytes: usize) -> ByteLruCache<&'static str, usize> {
        ByteLruCache::new(max_bytes, Arc::new(|v: &usize| *v), None)
    }

    struct CountingObserver(AtomicUsize);

    impl EvictionObserver for CountingObserver {
        fn on_evict(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = sized_cache(100);
        cache.put("a", 20);
        assert_eq!(cache.current_size(), 20);
        cache.put("b", 30);
        assert_eq!(cache.current_size(), 50);
        assert_eq!(cache.get(&"a"), Some(20));
        assert_eq!(cache.get(&"b"), Some(30));
    }

    #[test]
    fn test_cache_miss_counted() {
        let cache = sized_cache(100);
        assert!(cache.get(&"missing").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_cache_hit_stats() {
        let cache = sized_cache(100);
        cache.put("a", 10);
        cache.get(&"a");
        cache.get(&"a");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert!((stats.hit_ratio() - 1.0).abs() < f64::EPSILON);

        cache.reset_stats();
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_get_untracked_skips_stats() {
        let cache = sized_cache(100);
        cache.put("a", 10);
        cache.put("b", 10);
        assert_eq!(cache.get_untracked(&"a"), Some(10));
        assert!(cache.get_untracked(&"zzz").is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
        // Still promotes.
        assert_eq!(cache.keys_lru_order(), vec!["b", "a"]);
    }

    #[test]
    fn test_eviction_scenario() {
        let cache = sized_cache(100);
        cache.put("a", 50);
        cache.put("b", 40);
        cache.put("c", 30);

        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.current_size(), 70);

        cache.put("d", 50);
        assert!(!cache.contains(&"b"));
        assert_eq!(cache.current_size(), 80);
    }

    #[test]
    fn test_lru_order_respects_reads() {
        let cache = sized_cache(350);
        cache.put("a", 150);
        cache.put("b", 150);

        // Access a to make it recently used
        cache.get(&"a");

        cache.put("c", 150);
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn test_replace_adjusts_size() {
        let cache = sized_cache(100);
        cache.put("a", 20);
        cache.put("a", 50);
        assert_eq!(cache.current_size(), 50);
        cache.put("a", 10);
        assert_eq!(cache.current_size(), 10);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_equal_size_replace_is_net_zero() {
        let cache = sized_cache(100);
        cache.put("a", 30);
        cache.put("b", 30);
        let before = cache.current_size();
        cache.put("a", 30);
        assert_eq!(cache.current_size(), before);
    }

    #[test]
    fn test_get_does_not_change_size() {
        let cache = sized_cache(100);
        cache.put("a", 30);
        let before = cache.current_size();
        cache.get(&"a");
        assert_eq!(cache.current_size(), before);
    }

    #[test]
    fn test_put_promotes_existing_key() {
        let cache = sized_cache(100);
        cache.put("a", 40);
        cache.put("b", 40);
        cache.put("a", 40);
        cache.put("c", 40);
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
    }

    #[test]
    fn test_oversized_entry_is_not_kept() {
        let cache = sized_cache(100);
        cache.put("a", 40);
        cache.put("huge", 150);
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_resize_shrinks_oldest_first() {
        let cache = sized_cache(1000);
        cache.put("a", 50);
        cache.put("b", 40);
        cache.resize(80);
        assert_eq!(cache.max_size(), 80);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.current_size() <= 80);

        cache.put("c", 30);
        assert!(cache.current_size() <= 80);
        assert_eq!(cache.keys_lru_order(), vec!["b", "c"]);
    }

    #[test]
    fn test_resize_can_empty_cache() {
        let cache = sized_cache(1000);
        cache.put("a", 500);
        cache.resize(100);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_observer_called_per_eviction() {
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        let cache: ByteLruCache<&str, usize> =
            ByteLruCache::new(100, Arc::new(|v: &usize| *v), Some(observer.clone()));
        cache.put("a", 40);
        cache.put("b", 40);
        cache.put("c", 90);
        assert_eq!(observer.0.load(Ordering::Relaxed), 2);

        cache.resize(10);
        assert_eq!(observer.0.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_clear_does_not_notify() {
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        let cache: ByteLruCache<&str, usize> =
            ByteLruCache::new(100, Arc::new(|v: &usize| *v), Some(observer.clone()));
        cache.put("a", 40);
        cache.put("b", 40);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert_eq!(observer.0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_generations_are_independent_keys() {
        let cache = ImageCache::for_images(1000, None);
        let source = SourceId(7);
        let image = Arc::new(DecodedImage::new(
            vec![0u8; 12],
            2,
            2,
            crate::decoder::PixelFormat::Rgb8,
        ));
        cache.put(CacheKey::new(source, 1), Arc::clone(&image));
        assert!(cache.get(&CacheKey::new(source, 2)).is_none());

        cache.put(CacheKey::new(source, 2), image);
        assert_eq!(cache.generations_for(source), vec![1, 2]);
        assert_eq!(cache.current_size(), 24);
    }

    #[test]
    fn test_budget_holds_under_random_sequence() {
        let cache: ByteLruCache<u32, usize> = ByteLruCache::new(500, Arc::new(|v: &usize| *v), None);
        let mut seed = 0x2545_f491u32;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let key = seed % 40;
            let size = (seed % 120) as usize + 1;
            if seed % 3 == 0 {
                cache.get(&key);
            } else {
                cache.put(key, size);
            }
            assert!(cache.current_size() <= 500);
        }
    }
}
