use std::time::Duration;

use serde::Deserialize;

use crate::error::CacheError;

/// The minimum number of entries an in-memory cache must be able to store.
pub const MIN_SIZE: usize = 16;

/// The default number of entries an in-memory cache is able to store.
pub const DEFAULT_SIZE: usize = 128;

/// The largest supported duration adjustment.
pub const MAX_DURATION_ADJUSTMENT: f64 = 0.5;

/// The default duration adjustment applied by providers.
pub const DEFAULT_DURATION_ADJUSTMENT: f64 = 0.25;

/// Configuration for the in-memory cache backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Maximum number of entries the cache stores before evicting the least
    /// recently accessed one. Must be at least [`MIN_SIZE`].
    pub max_size: usize,

    /// Symmetric random jitter applied to entry durations, as a fraction in
    /// `[0, 0.5]`. A value of `0.25` spreads a nominal duration `d` uniformly
    /// over `[0.75 d, 1.25 d]`, which prevents entries written together from
    /// expiring together. `0` disables the jitter.
    pub duration_adjustment: f64,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_SIZE,
            duration_adjustment: DEFAULT_DURATION_ADJUSTMENT,
        }
    }
}

impl InMemoryConfig {
    /// Checks the configured values against their documented bounds.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_size < MIN_SIZE {
            return Err(CacheError::InvalidArgument(format!(
                "the cache size must be at least {MIN_SIZE}, got {}",
                self.max_size
            )));
        }
        validate_adjustment(self.duration_adjustment)
    }
}

pub(crate) fn validate_adjustment(adjustment: f64) -> Result<(), CacheError> {
    if !(0.0..=MAX_DURATION_ADJUSTMENT).contains(&adjustment) {
        return Err(CacheError::InvalidArgument(format!(
            "the duration adjustment must be within [0, {MAX_DURATION_ADJUSTMENT}], got {adjustment}"
        )));
    }
    Ok(())
}

/// Configuration for the auto-loading cache managers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name of the cache region the manager operates in. All entries of a
    /// manager live under this region, so two managers with different regions
    /// never collide even when they share a provider.
    pub region: String,

    /// Lifetime of a cache entry written by the manager.
    #[serde(with = "humantime_serde")]
    pub cache_duration: Duration,

    /// Lifetime of the reservation placeholder written by `touch` when a
    /// reload is claimed. If the reload crashes, other callers may claim the
    /// key again once this window has passed, so it is normally much shorter
    /// than [`cache_duration`](Self::cache_duration).
    #[serde(with = "humantime_serde")]
    pub touch_duration: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            region: "default".into(),
            cache_duration: Duration::from_secs(3600),
            touch_duration: Duration::from_secs(600),
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration with the given region and default durations.
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Default::default()
        }
    }

    /// Checks the configured values against their documented bounds.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.region.is_empty() {
            return Err(CacheError::InvalidArgument(
                "the cache region is mandatory".into(),
            ));
        }
        if self.cache_duration.as_secs() == 0 {
            return Err(CacheError::InvalidArgument(
                "the cache duration must be at least one second".into(),
            ));
        }
        if self.touch_duration.as_secs() == 0 {
            return Err(CacheError::InvalidArgument(
                "the touch duration must be at least one second".into(),
            ));
        }
        Ok(())
    }
}
