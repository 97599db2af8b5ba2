//! TTL- and size-bounded memoization of registry results.

use std::future::Future;

use moka::future::Cache;

use crate::config::CacheConfig;
use crate::types::{RegistryError, RegistryResult};

/// One independently configured result cache.
///
/// Values are immutable once stored; they only leave through TTL expiry or
/// capacity eviction. A disabled cache stores nothing and never hits.
#[derive(Clone)]
pub struct ResultCache<V> {
    inner: Cache<String, V>,
    enabled: bool,
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl)
            .build();
        Self {
            inner,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: Cache::builder().max_capacity(0).build(),
            enabled: false,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        self.inner.get(key).await
    }

    pub async fn set(&self, key: String, value: V) {
        if self.enabled {
            self.inner.insert(key, value).await;
        }
    }

    /// Return the cached value for `key`, or run `load` and cache its
    /// success.
    ///
    /// Concurrent callers with the same key share a single `load`; errors
    /// are handed to every waiter and not cached.
    pub async fn get_or_try_insert_with<F>(&self, key: String, load: F) -> RegistryResult<V>
    where
        F: Future<Output = RegistryResult<V>>,
    {
        if !self.enabled {
            return load.await;
        }
        self.inner
            .try_get_with(key, load)
            .await
            .map_err(|e: std::sync::Arc<RegistryError>| (*e).clone())
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}
