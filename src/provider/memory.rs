use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::{DEFAULT_SIZE, MIN_SIZE};
use crate::entry::CacheEntry;
use crate::error::CacheError;

use super::CacheBackend;

/// A [`CacheBackend`] that uses local memory as cache storage.
///
/// The store is bounded: a primary area holds up to the configured number of
/// entries in least-recently-used order, and entries evicted from it overflow
/// into a small spool area where they remain readable for a grace period
/// instead of vanishing abruptly. A spool hit moves the entry back into the
/// primary area.
///
/// All operations run under a single exclusive lock. A reader/writer split
/// buys nothing here because reads reorder the LRU list anyway, and one lock
/// makes the read-check-write of [`touch`](CacheBackend::touch) a single
/// critical section.
pub struct InMemoryBackend<V> {
    store: Mutex<Store<V>>,
}

struct Store<V> {
    primary: LruCache<String, CacheEntry<V>>,
    spool: LruCache<String, CacheEntry<V>>,
}

impl<V> Store<V> {
    /// Inserts into the primary area, spooling the entry this displaces.
    fn insert(&mut self, key: String, entry: CacheEntry<V>) {
        self.spool.pop(&key);

        let inserted = key.clone();
        if let Some((evicted_key, evicted)) = self.primary.push(key, entry) {
            if evicted_key != inserted {
                self.spool.push(evicted_key, evicted);
            }
        }
    }

    /// Reads the current entry without reordering the LRU list.
    fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.primary.peek(key).or_else(|| self.spool.peek(key))
    }
}

/// Capacity of the spool area holding recently evicted entries.
const SPOOL_SIZE: NonZeroUsize = match NonZeroUsize::new(MIN_SIZE) {
    Some(size) => size,
    None => panic!("the spool size must be positive"),
};

impl<V> InMemoryBackend<V> {
    /// Creates a backend with the default capacity.
    pub fn new() -> Self {
        const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(DEFAULT_SIZE) {
            Some(size) => size,
            None => panic!("the default size must be positive"),
        };

        Self {
            store: Mutex::new(Store {
                primary: LruCache::new(DEFAULT_CAPACITY),
                spool: LruCache::new(SPOOL_SIZE),
            }),
        }
    }

    /// Creates a backend holding up to `max_size` entries in its primary
    /// area. The capacity must be at least [`MIN_SIZE`].
    pub fn with_capacity(max_size: usize) -> Result<Self, CacheError> {
        let Some(capacity) = NonZeroUsize::new(max_size).filter(|size| size.get() >= MIN_SIZE)
        else {
            return Err(CacheError::InvalidArgument(format!(
                "the cache size must be at least {MIN_SIZE}, got {max_size}"
            )));
        };

        tracing::debug!(max_size, "Created a new in-memory cache backend");

        Ok(Self {
            store: Mutex::new(Store {
                primary: LruCache::new(capacity),
                spool: LruCache::new(SPOOL_SIZE),
            }),
        })
    }

    /// The number of entries currently held in the primary area.
    pub fn len(&self) -> usize {
        self.store.lock().primary.len()
    }

    /// Whether the primary area is empty.
    pub fn is_empty(&self) -> bool {
        self.store.lock().primary.is_empty()
    }
}

impl<V> Default for InMemoryBackend<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> CacheBackend<V> for InMemoryBackend<V> {
    fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError> {
        let mut store = self.store.lock();

        if let Some(entry) = store.primary.get(key) {
            return Ok(Some(entry.clone()));
        }

        // a spool hit counts as an access and returns the entry to the
        // primary area
        if let Some(entry) = store.spool.pop(key) {
            store.insert(key.to_owned(), entry.clone());
            return Ok(Some(entry));
        }

        Ok(None)
    }

    fn put(
        &self,
        key: &str,
        entry: CacheEntry<V>,
        _backend_duration: Duration,
    ) -> Result<(), CacheError> {
        // the store is bounded by entry count, not by time; the logical
        // expiration inside the entry is all that matters here
        self.store.lock().insert(key.to_owned(), entry);
        Ok(())
    }

    fn touch(&self, key: &str, duration: Duration) -> Result<bool, CacheError> {
        let mut store = self.store.lock();

        // By contract this is called for absent or expired keys. Finding a
        // live entry means another caller touched it first, and the
        // reservation fails.
        let previous = store.peek(key).cloned();
        if let Some(entry) = &previous {
            if !entry.has_expired() {
                tracing::trace!(key, "Entry has already been touched");
                return Ok(false);
            }
        }

        let touched = CacheEntry::touched(previous, duration)?;
        store.insert(key.to_owned(), touched);
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut store = self.store.lock();
        store.primary.pop(key);
        store.spool.pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut store = self.store.lock();
        store.primary.clear();
        store.spool.clear();
        Ok(())
    }
}
