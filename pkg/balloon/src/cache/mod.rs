//! In-memory digest caches for tree-internal nodes.

use hashing::Digest;
use lru::LruCache;
use parking_lot::Mutex;

pub use metrics::CacheMetrics;

mod metrics;

/// Approximate heap footprint of one entry: a position key of up to 34
/// bytes plus a 32-byte digest, rounded up for map overhead.
const ENTRY_BYTES: usize = 68;

/// A byte-bounded cache of node digests, keyed by position bytes
///
/// The cache is best-effort: entries may be evicted at any time, and entries
/// written during an append whose mutations are never applied are tolerated,
/// because every miss is self-healing (the reader substitutes a default hash
/// or recomputes from stored leaves).
///
/// Point operations are thread-safe; it is cheap to probe from read paths.
pub struct DigestCache {
    inner: Mutex<LruCache<Vec<u8>, Digest>>,
    max_entries: usize,
    metrics: CacheMetrics,
}

impl DigestCache {
    /// A cache bounded to roughly `max_bytes` of entries
    #[must_use]
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self::with_max_entries((max_bytes / ENTRY_BYTES).max(1))
    }

    /// A cache bounded to `max_entries` entries, evicting least-recently
    /// used entries beyond that
    #[must_use]
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::unbounded()),
            max_entries: max_entries.max(1),
            metrics: CacheMetrics::default(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Digest> {
        self.metrics.incr_gets();
        let mut inner = self.inner.lock();
        let digest = inner.get(key).cloned();
        if digest.is_some() {
            self.metrics.incr_hits();
        }
        digest
    }

    pub fn put(&self, key: Vec<u8>, digest: Digest) {
        self.metrics.incr_puts();
        let mut inner = self.inner.lock();
        if inner.len() >= self.max_entries && !inner.contains(key.as_slice()) {
            inner.pop_lru();
        }
        inner.put(key, digest);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Every entry in the cache, sorted by key; intended for tests that
    /// compare two caches
    #[must_use]
    pub fn entries(&self) -> Vec<(Vec<u8>, Digest)> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        entries
    }

    #[must_use]
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_put() {
        let cache = DigestCache::with_max_entries(10);
        assert!(cache.get(&[0x01]).is_none());

        cache.put(vec![0x01], Digest::new(vec![0xaa]));
        assert_eq!(cache.get(&[0x01]), Some(Digest::new(vec![0xaa])));

        assert_eq!(cache.metrics().gets(), 2);
        assert_eq!(cache.metrics().hits(), 1);
        assert_eq!(cache.metrics().misses(), 1);
        assert_eq!(cache.metrics().puts(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = DigestCache::with_max_entries(2);
        cache.put(vec![0x01], Digest::new(vec![0x01]));
        cache.put(vec![0x02], Digest::new(vec![0x02]));

        // touch 0x01 so 0x02 is the eviction candidate
        cache.get(&[0x01]);
        cache.put(vec![0x03], Digest::new(vec![0x03]));

        assert!(cache.get(&[0x01]).is_some());
        assert!(cache.get(&[0x02]).is_none());
        assert!(cache.get(&[0x03]).is_some());
    }

    #[test]
    fn byte_budget_never_rounds_to_zero() {
        let cache = DigestCache::with_max_bytes(1);
        cache.put(vec![0x01], Digest::new(vec![0x01]));
        assert_eq!(cache.len(), 1);
    }
}
