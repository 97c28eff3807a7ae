//! Auto-loading cache managers.
//!
//! A manager wraps a [`CacheProvider`] with a fixed region and converts every
//! `get` into a hit, miss, or stale-hit decision. On a miss or a stale hit it
//! arranges a reload through the caller-supplied [`DataProvider`], using the
//! provider's `touch` reservation so that any number of concurrent callers
//! produce exactly one load.
//!
//! [`SyncCacheManager`] reloads on the calling task, so a caller hitting an
//! expired entry pays for the reload. [`AsyncCacheManager`] instead spawns
//! the reload in the background and immediately serves the stale value,
//! which keeps tail latency flat while an entry is refreshed.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::config::ManagerConfig;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::provider::CacheProvider;

/// Provides the values to be cached, keyed by [`CacheKey`].
///
/// This is the slow data source the cache shields: a database, a remote
/// service, an expensive computation. Loads are fallible; a failed load is
/// logged by the manager and degrades to a miss (or to the stale value, when
/// one is at hand).
pub trait DataProvider<V>: Send + Sync {
    /// Retrieves the value related to the given key.
    fn retrieve<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<V, CacheError>>;
}

impl<V, F> DataProvider<V> for F
where
    F: Fn(&CacheKey) -> BoxFuture<'static, Result<V, CacheError>> + Send + Sync,
{
    fn retrieve<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<V, CacheError>> {
        self(key)
    }
}

/// An auto-loading cache manager that reloads expired entries on the calling
/// task.
///
/// The manager itself holds no mutable state; reentrancy and thread safety
/// come from delegating all shared-state updates to the provider.
#[derive(Debug, Clone)]
pub struct SyncCacheManager<V> {
    provider: CacheProvider<V>,
    region: String,
    cache_duration: Duration,
    touch_duration: Duration,
}

impl<V: Clone + Send + Sync + 'static> SyncCacheManager<V> {
    /// Creates a manager over the given provider.
    pub fn new(provider: CacheProvider<V>, config: ManagerConfig) -> Result<Self, CacheError> {
        config.validate()?;

        Ok(Self {
            provider,
            region: config.region,
            cache_duration: config.cache_duration,
            touch_duration: config.touch_duration,
        })
    }

    /// Returns the value related to the given key, loading it if needed.
    ///
    /// - On a *hit* the cached value is returned as is.
    /// - On a *miss* the manager tries to reserve the key. The winner loads
    ///   the value, stores it, and returns it; losers return `None` (calling
    ///   again will find the winner's entry).
    /// - On a *stale hit* the winner reloads and returns the new value, and
    ///   everyone else, as well as the winner if the reload fails, falls back
    ///   to the stale value.
    ///
    /// Failures never escape: they are logged and degrade the result.
    pub async fn get<P>(&self, key: &CacheKey, data_provider: &P) -> Option<V>
    where
        P: DataProvider<V> + ?Sized,
    {
        match self.provider.get(Some(&self.region), key) {
            None => {
                tracing::trace!(region = %self.region, %key, "Cache miss");
                self.reload(key, data_provider).await
            }
            Some(entry) if entry.has_expired() => {
                tracing::trace!(region = %self.region, %key, "Cache entry expired");
                match self.reload(key, data_provider).await {
                    Some(value) => Some(value),
                    None => entry.into_value(),
                }
            }
            Some(entry) => {
                tracing::trace!(region = %self.region, %key, "Cache hit");
                entry.into_value()
            }
        }
    }

    /// Removes the entry related to the given key, if any.
    pub fn evict(&self, key: &CacheKey) {
        tracing::debug!(region = %self.region, %key, "Evicting cache entry");
        self.provider.remove(Some(&self.region), key);
    }

    /// Claims the reload of the given key and performs it.
    ///
    /// Only the caller winning the `touch` reservation loads and stores the
    /// value; every other outcome returns `None`.
    async fn reload<P>(&self, key: &CacheKey, data_provider: &P) -> Option<V>
    where
        P: DataProvider<V> + ?Sized,
    {
        tracing::trace!(%key, "Touching key to reserve the reload");
        match self.provider.touch(Some(&self.region), key, self.touch_duration) {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!(%key, "Touch failed, another caller is reloading");
                return None;
            }
            // already logged by the provider
            Err(_) => return None,
        }

        match data_provider.retrieve(key).await {
            Ok(value) => {
                self.provider
                    .put(Some(&self.region), key, value.clone(), self.cache_duration);
                Some(value)
            }
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    region = %self.region,
                    %key,
                    "Unable to load value for cache",
                );
                None
            }
        }
    }
}

/// An auto-loading cache manager that refreshes expired entries in the
/// background.
///
/// Only refreshes run asynchronously, because in that case the requested
/// data is already in the cache and can be served right away. Insertions of
/// missing keys still load on the calling task, like the synchronous
/// manager.
#[derive(Debug, Clone)]
pub struct AsyncCacheManager<V> {
    inner: SyncCacheManager<V>,
    runner: tokio::runtime::Handle,
}

impl<V: Clone + Send + Sync + 'static> AsyncCacheManager<V> {
    /// Creates a manager over the given provider, spawning refresh tasks on
    /// the given runtime.
    pub fn new(
        provider: CacheProvider<V>,
        config: ManagerConfig,
        runner: tokio::runtime::Handle,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            inner: SyncCacheManager::new(provider, config)?,
            runner,
        })
    }

    /// Returns the value related to the given key, loading it if needed.
    ///
    /// Behaves like [`SyncCacheManager::get`] except on a stale hit: the
    /// stale value is returned immediately and the reload, if this caller
    /// won the reservation, happens in a background task. An expiring entry
    /// therefore never blocks a reader.
    pub async fn get<P>(&self, key: &CacheKey, data_provider: &Arc<P>) -> Option<V>
    where
        P: DataProvider<V> + 'static,
    {
        let region = &self.inner.region;
        match self.inner.provider.get(Some(region), key) {
            None => {
                tracing::trace!(%region, %key, "Cache miss");
                self.inner.reload(key, data_provider.as_ref()).await
            }
            Some(entry) if entry.has_expired() => {
                tracing::trace!(%region, %key, "Cache entry expired");
                self.spawn_refresh(key, data_provider);
                entry.into_value()
            }
            Some(entry) => {
                tracing::trace!(%region, %key, "Cache hit");
                entry.into_value()
            }
        }
    }

    /// Removes the entry related to the given key, if any.
    pub fn evict(&self, key: &CacheKey) {
        self.inner.evict(key);
    }

    /// Claims the refresh of the given key and schedules it on the runner.
    ///
    /// The touch reservation guarantees at most one inflight refresh per
    /// key; losing the reservation means another caller's task is already
    /// underway and there is nothing to do.
    fn spawn_refresh<P>(&self, key: &CacheKey, data_provider: &Arc<P>)
    where
        P: DataProvider<V> + 'static,
    {
        let manager = &self.inner;

        tracing::trace!(%key, "Touching key to reserve the refresh");
        match manager.provider.touch(Some(&manager.region), key, manager.touch_duration) {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!(%key, "Touch failed, another caller is refreshing");
                return;
            }
            Err(_) => return,
        }

        tracing::trace!(%key, "Scheduling refresh task");

        let provider = manager.provider.clone();
        let region = manager.region.clone();
        let cache_duration = manager.cache_duration;
        let key = key.clone();
        let data_provider = Arc::clone(data_provider);

        self.runner.spawn(async move {
            match data_provider.retrieve(&key).await {
                Ok(value) => {
                    provider.put(Some(&region), &key, value, cache_duration);
                }
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        %region,
                        %key,
                        "Unable to refresh cache entry",
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use crate::entry::{unix_now, CacheEntry};
    use crate::provider::{actual_key, CacheBackend, InMemoryBackend};
    use crate::testutils;

    use super::*;

    /// A data provider that counts its invocations, returning a canned value
    /// after an optional delay.
    struct CountingProvider {
        retrievals: AtomicUsize,
        value: String,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(value: &str) -> Arc<Self> {
            Self::slow(value, Duration::ZERO)
        }

        fn slow(value: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                retrievals: AtomicUsize::new(0),
                value: value.to_owned(),
                delay,
            })
        }

        fn retrievals(&self) -> usize {
            self.retrievals.load(Ordering::SeqCst)
        }
    }

    impl DataProvider<String> for CountingProvider {
        fn retrieve<'a>(&'a self, _key: &'a CacheKey) -> BoxFuture<'a, Result<String, CacheError>> {
            self.retrievals.fetch_add(1, Ordering::SeqCst);
            async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                Ok(self.value.clone())
            }
            .boxed()
        }
    }

    /// A data provider that always fails.
    struct FailingProvider;

    impl DataProvider<String> for FailingProvider {
        fn retrieve<'a>(&'a self, _key: &'a CacheKey) -> BoxFuture<'a, Result<String, CacheError>> {
            async { Err(CacheError::Load("source unavailable".into())) }.boxed()
        }
    }

    fn user_key(id: u64) -> CacheKey {
        CacheKey::new("user", 1, vec![id.into()]).unwrap()
    }

    fn test_setup() -> (Arc<InMemoryBackend<String>>, CacheProvider<String>, ManagerConfig) {
        testutils::setup();
        let backend = Arc::new(InMemoryBackend::new());
        let provider = CacheProvider::with_adjustment(backend.clone(), 0.0).unwrap();
        (backend, provider, ManagerConfig::for_region("R"))
    }

    fn plant_stale(backend: &InMemoryBackend<String>, key: &CacheKey, value: &str) {
        let stale = CacheEntry::with_expiration(Some(value.to_owned()), unix_now() - 10);
        backend
            .put(&actual_key(Some("R"), key), stale, Duration::from_secs(1))
            .unwrap();
    }

    #[tokio::test]
    async fn test_miss_loads_then_hits() {
        let (_, provider, config) = test_setup();
        let manager = SyncCacheManager::new(provider, config).unwrap();

        let key = user_key(42);
        assert_eq!(key.serialize(), "42-user-v1");
        let loader = CountingProvider::new("U42");

        let value = manager.get(&key, loader.as_ref()).await;
        assert_eq!(value.as_deref(), Some("U42"));

        // the second read is served from the cache
        let value = manager.get(&key, loader.as_ref()).await;
        assert_eq!(value.as_deref(), Some("U42"));
        assert_eq!(loader.retrievals(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_misses_load_once() {
        let (_, provider, config) = test_setup();
        let manager = Arc::new(SyncCacheManager::new(provider, config).unwrap());

        let key = user_key(42);
        let counter = Arc::new(AtomicUsize::new(0));

        /// Counts loads and makes each one slow enough that all callers see
        /// the same miss.
        struct SlowProvider(Arc<AtomicUsize>);

        impl DataProvider<String> for SlowProvider {
            fn retrieve<'a>(
                &'a self,
                _key: &'a CacheKey,
            ) -> BoxFuture<'a, Result<String, CacheError>> {
                let loads = self.0.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    // slow enough that every caller decides on the same miss
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    Ok(loads.to_string())
                }
                .boxed()
            }
        }

        let loader = Arc::new(SlowProvider(counter.clone()));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let manager = manager.clone();
                let key = key.clone();
                let loader = loader.clone();
                tokio::spawn(async move { manager.get(&key, loader.as_ref()).await })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if let Some(value) = task.await.unwrap() {
                winners += 1;
                assert_eq!(value, "1");
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // later readers find the winner's entry
        let loader = CountingProvider::new("unused");
        let value = manager.get(&key, loader.as_ref()).await;
        assert_eq!(value.as_deref(), Some("1"));
        assert_eq!(loader.retrievals(), 0);
    }

    #[tokio::test]
    async fn test_reserved_key_reads_as_empty_until_populated() {
        let (_, provider, config) = test_setup();
        let manager = SyncCacheManager::new(provider.clone(), config).unwrap();

        let key = user_key(42);
        // another caller holds the reservation for this key
        assert_eq!(provider.touch(Some("R"), &key, Duration::from_secs(60)), Ok(true));

        let loader = CountingProvider::new("unused");
        let value = manager.get(&key, loader.as_ref()).await;

        assert_eq!(value, None);
        assert_eq!(loader.retrievals(), 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_reloaded_synchronously() {
        let (backend, provider, config) = test_setup();
        let manager = SyncCacheManager::new(provider, config).unwrap();

        let key = user_key(42);
        plant_stale(&backend, &key, "old");

        let loader = CountingProvider::new("new");
        let value = manager.get(&key, loader.as_ref()).await;

        assert_eq!(value.as_deref(), Some("new"));
        assert_eq!(loader.retrievals(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_falls_back_to_the_stale_value() {
        let (backend, provider, config) = test_setup();
        let manager = SyncCacheManager::new(provider, config).unwrap();

        let key = user_key(42);
        plant_stale(&backend, &key, "old");

        let value = manager.get(&key, &FailingProvider).await;
        assert_eq!(value.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_failed_load_on_miss_returns_none() {
        let (_, provider, config) = test_setup();
        let manager = SyncCacheManager::new(provider, config).unwrap();

        let value = manager.get(&user_key(42), &FailingProvider).await;
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_evict_forces_a_reload() {
        let (_, provider, config) = test_setup();
        let manager = SyncCacheManager::new(provider, config).unwrap();

        let key = user_key(42);
        let loader = CountingProvider::new("U42");

        manager.get(&key, loader.as_ref()).await;
        manager.evict(&key);
        manager.get(&key, loader.as_ref()).await;

        assert_eq!(loader.retrievals(), 2);
    }

    #[tokio::test]
    async fn test_async_manager_loads_misses_on_the_caller() {
        let (_, provider, config) = test_setup();
        let manager =
            AsyncCacheManager::new(provider, config, tokio::runtime::Handle::current()).unwrap();

        let key = user_key(42);
        let loader = CountingProvider::new("U42");

        let value = manager.get(&key, &loader).await;
        assert_eq!(value.as_deref(), Some("U42"));
        assert_eq!(loader.retrievals(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_reads_serve_the_old_value_and_refresh_once() {
        let (backend, provider, config) = test_setup();
        let manager =
            AsyncCacheManager::new(provider, config, tokio::runtime::Handle::current()).unwrap();

        let key = user_key(42);
        plant_stale(&backend, &key, "old");

        // slow enough that the refresh cannot land between the two reads
        let loader = CountingProvider::slow("new", Duration::from_millis(50));

        // both stale readers get the old value without blocking
        let (first, second) =
            tokio::join!(manager.get(&key, &loader), manager.get(&key, &loader));
        assert_eq!(first.as_deref(), Some("old"));
        assert_eq!(second.as_deref(), Some("old"));

        // exactly one refresh task was scheduled; once it lands, readers see
        // the new value
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if manager.get(&key, &loader).await.as_deref() == Some("new") {
                break;
            }
        }
        assert_eq!(manager.get(&key, &loader).await.as_deref(), Some("new"));
        assert_eq!(loader.retrievals(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_refresh_keeps_serving_the_stale_value() {
        let (backend, provider, config) = test_setup();
        let manager =
            AsyncCacheManager::new(provider, config, tokio::runtime::Handle::current()).unwrap();

        let key = user_key(42);
        plant_stale(&backend, &key, "old");

        let loader = Arc::new(FailingProvider);
        let value = manager.get(&key, &loader).await;
        assert_eq!(value.as_deref(), Some("old"));

        tokio::time::sleep(Duration::from_millis(50)).await;

        // the reservation placeholder still carries the stale value
        let value = manager.get(&key, &loader).await;
        assert_eq!(value.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_noop_provider_always_loads() {
        testutils::setup();

        let manager =
            SyncCacheManager::new(CacheProvider::noop(), ManagerConfig::for_region("R")).unwrap();

        let key = user_key(42);
        let loader = CountingProvider::new("U42");

        assert_eq!(manager.get(&key, loader.as_ref()).await.as_deref(), Some("U42"));
        assert_eq!(manager.get(&key, loader.as_ref()).await.as_deref(), Some("U42"));
        assert_eq!(loader.retrievals(), 2);
    }

    #[tokio::test]
    async fn test_closures_can_act_as_data_providers() {
        let (_, provider, config) = test_setup();
        let manager = SyncCacheManager::new(provider, config).unwrap();

        let loader = |key: &CacheKey| {
            let key = key.clone();
            async move { Ok(format!("loaded {key}")) }.boxed()
        };

        let value = manager.get(&user_key(42), &loader).await;
        assert_eq!(value.as_deref(), Some("loaded 42-user-v1"));
    }
}
