//! Shared caches owned by the builder.
//!
//! The watch session only ever removes entries. Builders hand their caches
//! over as `Arc<dyn ArtifactCache>`; both `DashMap` and a
//! `parking_lot::Mutex<HashMap>` work out of the box.

use std::collections::HashMap;
use std::hash::BuildHasher;

use dashmap::DashMap;
use parking_lot::Mutex;

/// A string-keyed cache that can be evicted into.
pub trait ArtifactCache: Send + Sync {
    /// Remove `key`, returning whether it was present.
    fn evict(&self, key: &str) -> bool;

    fn contains(&self, key: &str) -> bool;
}

impl<V, S> ArtifactCache for DashMap<String, V, S>
where
    V: Send + Sync,
    S: BuildHasher + Clone + Send + Sync,
{
    fn evict(&self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl<V, S> ArtifactCache for Mutex<HashMap<String, V, S>>
where
    V: Send,
    S: BuildHasher + Send,
{
    fn evict(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_dashmap_eviction() {
        let cache: Arc<DashMap<String, u32>> = Arc::new(DashMap::new());
        cache.insert("a".to_string(), 1);
        let shared: Arc<dyn ArtifactCache> = cache.clone();

        assert!(shared.contains("a"));
        assert!(shared.evict("a"));
        assert!(!shared.evict("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_mutex_map_eviction() {
        let cache = Arc::new(Mutex::new(HashMap::from([("/p/package.json".to_string(), "{}")])));
        let shared: Arc<dyn ArtifactCache> = cache.clone();

        assert!(shared.evict("/p/package.json"));
        assert!(!shared.contains("/p/package.json"));
        assert!(cache.lock().is_empty());
    }
}
