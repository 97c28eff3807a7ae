use std::time::Duration;

use crate::entry::CacheEntry;
use crate::error::CacheError;

use super::CacheBackend;

/// A [`CacheBackend`] where every insertion takes no effect and the cache is
/// always empty.
///
/// `touch` always reports a won reservation, so a manager layered on this
/// backend proceeds to load on every call and never caches the result. This
/// disables caching without changing any call sites.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl<V: Send + Sync> CacheBackend<V> for NoopBackend {
    fn get(&self, _key: &str) -> Result<Option<CacheEntry<V>>, CacheError> {
        Ok(None)
    }

    fn put(
        &self,
        _key: &str,
        _entry: CacheEntry<V>,
        _backend_duration: Duration,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    fn touch(&self, _key: &str, _duration: Duration) -> Result<bool, CacheError> {
        Ok(true)
    }

    fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
