use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::CacheError;

/// Returns the current Unix timestamp in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// An entry in the caching system: a value together with the absolute wall
/// clock time at which it expires.
///
/// Expiration is *logical*: an expired entry is still returned by
/// [`CacheProvider::get`](crate::CacheProvider::get) so that callers have a
/// stale value to serve while a refresh is arranged. The value may be absent,
/// which happens for reservation placeholders written by `touch` on a key
/// that was never populated.
///
/// Durations have one-second resolution; sub-second durations are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: Option<V>,
    /// Unix timestamp (in seconds) when the entry expires.
    expiration: u64,
}

impl<V> CacheEntry<V> {
    /// Creates an entry expiring `duration` from now.
    ///
    /// The duration must be at least one second.
    pub fn new(value: Option<V>, duration: Duration) -> Result<Self, CacheError> {
        if duration.as_secs() == 0 {
            return Err(CacheError::InvalidArgument(
                "entry duration must be at least one second".into(),
            ));
        }

        Ok(Self {
            value,
            expiration: unix_now() + duration.as_secs(),
        })
    }

    /// Creates the placeholder entry written by a successful `touch`: it
    /// carries the previous entry's value (or none) with a fresh expiration.
    pub fn touched(previous: Option<Self>, duration: Duration) -> Result<Self, CacheError> {
        Self::new(previous.and_then(Self::into_value), duration)
    }

    /// Creates an entry with an explicit expiration timestamp.
    #[cfg(test)]
    pub(crate) fn with_expiration(value: Option<V>, expiration: u64) -> Self {
        Self { value, expiration }
    }

    /// The cached value, if any.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Consumes the entry, returning the cached value.
    pub fn into_value(self) -> Option<V> {
        self.value
    }

    /// Unix timestamp (in seconds) when the entry expires.
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// Whether the entry's expiration lies in the past.
    pub fn has_expired(&self) -> bool {
        unix_now() > self.expiration
    }
}
