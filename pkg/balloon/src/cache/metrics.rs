use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Counters for a [`DigestCache`], useful for sizing the cache level
///
/// [`DigestCache`]: crate::DigestCache
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    gets: Arc<AtomicUsize>,
    hits: Arc<AtomicUsize>,
    puts: Arc<AtomicUsize>,
}

impl CacheMetrics {
    /// The number of lookups performed against the cache
    #[inline]
    #[must_use]
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// The number of lookups that found an entry
    #[inline]
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// The number of lookups that found nothing
    #[inline]
    #[must_use]
    pub fn misses(&self) -> usize {
        self.gets() - self.hits()
    }

    /// The number of entries written
    #[inline]
    #[must_use]
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    pub(crate) fn incr_gets(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_puts(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }
}
