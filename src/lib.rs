//! An auto-loading, stampede-safe cache.
//!
//! This crate sits between callers and a slow data source and guarantees
//! that concurrent callers for the same expired or missing key never produce
//! a stampede of loads. It is built out of three layers that can be composed
//! and used on their own:
//!
//! - A [`CacheProvider`] stores entries with expiration over a pluggable
//!   [`CacheBackend`]. It randomizes effective durations to spread out
//!   expirations, degrades every failure to a cache miss, and offers the
//!   cooperative [`touch`](CacheProvider::touch) reservation: a conditional
//!   expiration extension that succeeds for exactly one racing caller. An
//!   [`InMemoryBackend`] with bounded LRU storage and a [`NoopBackend`] that
//!   disables caching are included.
//! - The auto-loading managers turn a `get` into a hit, miss, or stale-hit
//!   decision and orchestrate reloads through a [`DataProvider`]: the
//!   [`SyncCacheManager`] reloads on the calling task, while the
//!   [`AsyncCacheManager`] serves stale values immediately and refreshes in
//!   the background.
//! - The [`BoundedTaskExecutor`] runs batches of tasks over a bounded
//!   resource pool, starting them in submission order and letting a waiting
//!   caller promote its task to run next.
//!
//! # Example
//!
//! ```
//! use autocache::{CacheProvider, InMemoryConfig, KeyBuilder, ManagerConfig, SyncCacheManager};
//! use futures::FutureExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let provider = CacheProvider::in_memory(&InMemoryConfig::default()).unwrap();
//! let manager = SyncCacheManager::new(provider, ManagerConfig::for_region("users")).unwrap();
//!
//! let users = KeyBuilder::new("user", 1).unwrap();
//! let load = |key: &autocache::CacheKey| {
//!     let key = key.clone();
//!     async move { Ok(format!("user for {key}")) }.boxed()
//! };
//!
//! // a miss loads through the closure; later reads hit the cache
//! let value = manager.get(&users.build(vec![42.into()]), &load).await;
//! assert_eq!(value.as_deref(), Some("user for 42-user-v1"));
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod entry;
mod error;
mod executor;
mod key;
mod manager;
mod provider;

pub use config::{
    InMemoryConfig, ManagerConfig, DEFAULT_DURATION_ADJUSTMENT, DEFAULT_SIZE,
    MAX_DURATION_ADJUSTMENT, MIN_SIZE,
};
pub use entry::CacheEntry;
pub use error::{CacheError, ExecutorError};
pub use executor::{BoundedTaskExecutor, TaskFuture};
pub use key::{CacheKey, Component, KeyBuilder};
pub use manager::{AsyncCacheManager, DataProvider, SyncCacheManager};
pub use provider::{CacheBackend, CacheProvider, InMemoryBackend, NoopBackend};

#[cfg(test)]
mod testutils;
