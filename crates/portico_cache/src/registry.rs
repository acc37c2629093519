//! Named-cache registry: shares cache instances across routing rules.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::{CacheError, LruCache, Measured};

const LRU_STRATEGY: &str = "lru";

/// Instantiate the configured cache algorithm.
fn build_cache<T: Measured>(strategy: &str, limit: usize) -> Result<Arc<LruCache<T>>, CacheError> {
    match strategy {
        LRU_STRATEGY => Ok(Arc::new(LruCache::new(limit))),
        "" => Err(CacheError::StrategyRequired),
        other => Err(CacheError::UnknownStrategy(other.to_string())),
    }
}

/// Maps cache names to shared instances. An empty name always yields a fresh
/// unshared cache.
pub struct CacheRegistry<T> {
    caches: DashMap<String, Arc<LruCache<T>>>,
}

impl<T: Measured> CacheRegistry<T> {
    pub fn new() -> Self {
        Self {
            caches: DashMap::new(),
        }
    }

    /// Create (or look up) a cache.
    ///
    /// When `name` is non-empty and already registered, the existing instance
    /// is returned and the `strategy`/`limit` arguments are ignored.
    pub fn create(
        &self,
        name: &str,
        strategy: &str,
        limit: usize,
    ) -> Result<Arc<LruCache<T>>, CacheError> {
        if limit == 0 {
            return Err(CacheError::ZeroSized);
        }

        if name.is_empty() {
            return build_cache(strategy, limit);
        }

        match self.caches.entry(name.to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let cache = build_cache(strategy, limit)?;
                debug!(target: "portico::cache", %name, limit, "Creating named cache");
                slot.insert(cache.clone());
                Ok(cache)
            }
        }
    }
}

impl<T: Measured> Default for CacheRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
