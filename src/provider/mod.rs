//! Cache providers: pluggable storage behind a common cross-cutting wrapper.
//!
//! A [`CacheBackend`] implements five storage operations on composite string
//! keys. The [`CacheProvider`] wraps any backend and layers the behavior all
//! providers share on top: argument validation, region and key composition,
//! duration randomization, and failure swallowing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::{self, InMemoryConfig};
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::key::CacheKey;

mod memory;
mod noop;

pub use memory::InMemoryBackend;
pub use noop::NoopBackend;

/// The storage operations a cache backend has to provide.
///
/// Keys are the composite strings built by [`CacheProvider`] out of the
/// structural [`CacheKey`] and the region. Implementations must make
/// [`touch`](Self::touch) atomic: for any number of concurrent touches of the
/// same absent or expired key, exactly one may return `true`. A backend with
/// its own expiration mechanism should apply `backend_duration` as its
/// expiration, which the provider sets to twice the logical entry lifetime
/// so that expired entries stay readable for stale serves.
pub trait CacheBackend<V>: Send + Sync {
    /// Returns the entry stored for `key`, expired or not.
    fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, CacheError>;

    /// Stores `entry` under `key`, replacing any previous entry.
    fn put(
        &self,
        key: &str,
        entry: CacheEntry<V>,
        backend_duration: Duration,
    ) -> Result<(), CacheError>;

    /// Writes a fresh placeholder entry if `key` is absent or expired and
    /// returns whether this call was the one that did.
    fn touch(&self, key: &str, duration: Duration) -> Result<bool, CacheError>;

    /// Removes the entry stored for `key`, if any.
    fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Drops all entries in all regions.
    fn clear(&self) -> Result<(), CacheError>;
}

/// Cache storage with expiration, keyed by region and [`CacheKey`].
///
/// The provider is deliberately invisible on failure: any error raised while
/// reading or writing is logged and the caller observes a cache miss or a
/// no-op instead. The one exception is [`touch`](Self::touch), which
/// propagates errors, because a touch failure reported as a successful
/// reservation would break the single-loader guarantee the managers build on
/// it.
///
/// Entry durations are randomized by the configured adjustment so that
/// entries written in bulk do not all expire in the same moment.
pub struct CacheProvider<V> {
    backend: Arc<dyn CacheBackend<V>>,
    duration_adjustment: f64,
}

impl<V> Clone for CacheProvider<V> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            duration_adjustment: self.duration_adjustment,
        }
    }
}

impl<V> fmt::Debug for CacheProvider<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheProvider")
            .field("duration_adjustment", &self.duration_adjustment)
            .finish_non_exhaustive()
    }
}

impl<V: Clone + Send + Sync + 'static> CacheProvider<V> {
    /// Creates a provider over the given backend with the default duration
    /// adjustment.
    pub fn new(backend: Arc<dyn CacheBackend<V>>) -> Self {
        Self {
            backend,
            duration_adjustment: config::DEFAULT_DURATION_ADJUSTMENT,
        }
    }

    /// Creates a provider over the given backend with an explicit duration
    /// adjustment in `[0, 0.5]`. An adjustment of `0` disables the jitter.
    pub fn with_adjustment(
        backend: Arc<dyn CacheBackend<V>>,
        duration_adjustment: f64,
    ) -> Result<Self, CacheError> {
        config::validate_adjustment(duration_adjustment)?;
        Ok(Self {
            backend,
            duration_adjustment,
        })
    }

    /// Creates a provider backed by a bounded in-memory store.
    pub fn in_memory(config: &InMemoryConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let backend = Arc::new(InMemoryBackend::with_capacity(config.max_size)?);
        Self::with_adjustment(backend, config.duration_adjustment)
    }

    /// Creates a provider that never stores anything, useful to disable
    /// caching without changing call sites.
    pub fn noop() -> Self {
        Self {
            backend: Arc::new(NoopBackend),
            duration_adjustment: 0.0,
        }
    }

    /// Returns the entry for the given key, regardless of its expiration.
    ///
    /// Returning stale entries is intentional: the managers need the old
    /// value to serve while they arrange a refresh. Returns `None` only when
    /// no entry exists or the backend failed.
    pub fn get(&self, region: Option<&str>, key: &CacheKey) -> Option<CacheEntry<V>> {
        let actual_key = actual_key(region, key);
        match self.backend.get(&actual_key) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    %key,
                    region = region.unwrap_or_default(),
                    "Unable to read cache entry",
                );
                None
            }
        }
    }

    /// Stores a new entry for the given key with a randomized effective
    /// duration, replacing any previous entry. Failures are logged and
    /// swallowed.
    pub fn put(&self, region: Option<&str>, key: &CacheKey, value: V, duration: Duration) {
        let actual_key = actual_key(region, key);
        let result = self.store(&actual_key, value, duration);

        if let Err(err) = result {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                %key,
                region = region.unwrap_or_default(),
                "Unable to populate cache entry",
            );
        }
    }

    fn store(&self, actual_key: &str, value: V, duration: Duration) -> Result<(), CacheError> {
        if duration.as_secs() == 0 {
            return Err(CacheError::InvalidArgument(
                "the entry duration must be at least one second".into(),
            ));
        }

        let actual_duration = self.randomize(duration);
        let entry = CacheEntry::new(Some(value), actual_duration)?;

        // The backend receives twice the logical duration as its own
        // expiration. Entries then outlive their logical expiration, which is
        // what keeps stale reads possible.
        self.backend
            .put(actual_key, entry, actual_duration.saturating_mul(2))
    }

    /// Reserves the given key for an update.
    ///
    /// Writes a fresh placeholder entry carrying the previous value if the
    /// key is absent or expired, and returns whether this caller won the
    /// reservation. For any number of concurrent touches of the same key,
    /// exactly one receives `true`.
    ///
    /// Unlike the other operations, errors are propagated after logging: a
    /// swallowed failure would be indistinguishable from a successful
    /// reservation.
    pub fn touch(
        &self,
        region: Option<&str>,
        key: &CacheKey,
        duration: Duration,
    ) -> Result<bool, CacheError> {
        let actual_key = actual_key(region, key);
        let result = if duration.as_secs() == 0 {
            Err(CacheError::InvalidArgument(
                "the touch duration must be at least one second".into(),
            ))
        } else {
            self.backend.touch(&actual_key, duration)
        };

        if let Err(err) = &result {
            tracing::error!(
                error = err as &dyn std::error::Error,
                %key,
                region = region.unwrap_or_default(),
                "Unable to touch cache entry",
            );
        }
        result
    }

    /// Removes the entry for the given key, if any. Failures are logged and
    /// swallowed.
    pub fn remove(&self, region: Option<&str>, key: &CacheKey) {
        let actual_key = actual_key(region, key);
        if let Err(err) = self.backend.remove(&actual_key) {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                %key,
                region = region.unwrap_or_default(),
                "Unable to remove cache entry",
            );
        }
    }

    /// Drops all entries in all regions. Failures are logged and swallowed.
    pub fn empty(&self) {
        if let Err(err) = self.backend.clear() {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "Unable to empty the cache",
            );
        }
    }

    /// Adjusts the duration by a random value within the configured bounds,
    /// yielding a duration in `[d (1 - a), d (1 + a)]`.
    fn randomize(&self, duration: Duration) -> Duration {
        if self.duration_adjustment <= 0.0 {
            return duration;
        }

        let adjustment = rand::rng().random_range(-self.duration_adjustment..=self.duration_adjustment);
        let base = duration.as_secs();
        let delta = (adjustment * base as f64) as i64;
        let adjusted = (base as i64 + delta).max(1);
        Duration::from_secs(adjusted as u64)
    }
}

/// Builds the actual key used in the underlying storage by combining the
/// serialized cache key and the region. An absent region is equivalent to an
/// empty one.
pub(crate) fn actual_key(region: Option<&str>, key: &CacheKey) -> String {
    match region {
        Some(region) if !region.is_empty() => format!("{}-{region}", key.serialize()),
        _ => key.serialize().to_owned(),
    }
}
