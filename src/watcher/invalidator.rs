//! Immediate cache eviction for changed identities.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::cache::ArtifactCache;

use super::canonical::Identity;
use super::registry::WatchRegistry;

/// What one invalidation removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Invalidation {
    /// Build cache keys that were present and removed.
    pub evicted: Vec<String>,
    /// Whether the package cache held an entry for the identity.
    pub package_evicted: bool,
    /// Watch handles closed for the identity.
    pub closed: usize,
}

/// Evicts build and package cache entries and tears down watches.
///
/// Also tracks which module ids were discovered for which identity, so
/// that a change to a file evicts the ids the builder cached it under.
#[derive(Default)]
pub struct CacheInvalidator {
    build: Option<Arc<dyn ArtifactCache>>,
    packages: Option<Arc<dyn ArtifactCache>>,
    modules: HashMap<Identity, BTreeSet<String>>,
}

impl CacheInvalidator {
    pub fn new(
        build: Option<Arc<dyn ArtifactCache>>,
        packages: Option<Arc<dyn ArtifactCache>>,
    ) -> Self {
        Self {
            build,
            packages,
            modules: HashMap::new(),
        }
    }

    /// Remember that module `id` was built from `identity`.
    pub fn record_module(&mut self, identity: Identity, id: String) {
        self.modules.entry(identity).or_default().insert(id);
    }

    /// Module ids currently recorded for `identity`.
    pub fn module_ids(&self, identity: &Identity) -> impl Iterator<Item = &str> {
        self.modules
            .get(identity)
            .into_iter()
            .flat_map(|ids| ids.iter().map(String::as_str))
    }

    /// Evict everything cached for `identity` and close its watches.
    ///
    /// The module id mapping is dropped too; the builder reports it again
    /// when it rediscovers the module on the next pass.
    pub fn invalidate(&mut self, identity: &Identity, registry: &mut WatchRegistry) -> Invalidation {
        let mut keys: BTreeSet<String> = self.modules.remove(identity).unwrap_or_default();
        keys.insert(identity.key());

        let evicted = match &self.build {
            Some(cache) => keys.into_iter().filter(|key| cache.evict(key)).collect(),
            None => Vec::new(),
        };

        let package_evicted = self
            .packages
            .as_ref()
            .is_some_and(|cache| cache.evict(&identity.key()));

        let closed = registry.teardown(identity);

        Invalidation {
            evicted,
            package_evicted,
            closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::backend::testing::FakeBackend;
    use super::*;
    use dashmap::DashMap;
    use tokio::sync::mpsc;

    fn registry() -> WatchRegistry {
        let (tx, _rx) = mpsc::unbounded_channel();
        WatchRegistry::new(Arc::new(FakeBackend::default()), tx)
    }

    #[test]
    fn test_invalidate_evicts_path_and_module_ids() {
        let build: Arc<DashMap<String, &str>> = Arc::new(DashMap::new());
        build.insert("a".into(), "compiled a");
        build.insert("/proj/a.js".into(), "compiled a by path");
        build.insert("b".into(), "compiled b");
        let mut invalidator = CacheInvalidator::new(Some(build.clone()), None);
        let identity = Identity::new("/proj/a.js");
        invalidator.record_module(identity.clone(), "a".into());

        let mut registry = registry();
        registry.ensure_watch(&identity, identity.as_path()).unwrap();

        let result = invalidator.invalidate(&identity, &mut registry);

        assert_eq!(result.evicted, vec!["/proj/a.js".to_string(), "a".to_string()]);
        assert_eq!(result.closed, 1);
        assert!(!build.contains_key("a"));
        assert!(build.contains_key("b"));
        assert!(!registry.contains(&identity));
        assert_eq!(invalidator.module_ids(&identity).count(), 0);
    }

    #[test]
    fn test_invalidate_evicts_package_metadata() {
        let packages: Arc<DashMap<String, u8>> = Arc::new(DashMap::new());
        packages.insert("/proj/package.json".into(), 1);
        let mut invalidator = CacheInvalidator::new(None, Some(packages.clone()));

        let result =
            invalidator.invalidate(&Identity::new("/proj/package.json"), &mut registry());

        assert!(result.package_evicted);
        assert!(result.evicted.is_empty());
        assert!(packages.is_empty());
    }

    #[test]
    fn test_invalidate_unknown_identity_is_harmless() {
        let mut invalidator = CacheInvalidator::default();

        let result = invalidator.invalidate(&Identity::new("/nowhere.js"), &mut registry());

        assert_eq!(result, Invalidation::default());
    }
}
