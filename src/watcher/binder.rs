//! Attribution of transform-read files to their owning module.
//!
//! When a transform of `a.js` reads `a.json`, edits to `a.json` must
//! invalidate `a.js`. The binder watches the auxiliary file under the
//! owner's identity, so one change tears down the owner's cache entry and
//! all of its watches together.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use super::canonical::{Canonical, Canonicalizer};
use super::error::WatchError;
use super::registry::{Ensured, WatchRegistry};

/// Both sides of a binding, canonicalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub owner: Canonical,
    pub file: Canonical,
}

impl Binding {
    /// Watch the auxiliary file under the owner.
    ///
    /// Looks the owner up again at install time; an owner torn down while
    /// this binding was resolving simply gets a fresh entry.
    pub fn install(&self, registry: &mut WatchRegistry) -> Result<Ensured, WatchError> {
        registry.ensure_watch(self.owner.identity(), self.file.identity().as_path())
    }
}

pub struct DependencyBinder {
    canonicalizer: Arc<Canonicalizer>,
}

impl DependencyBinder {
    pub fn new(canonicalizer: Arc<Canonicalizer>) -> Self {
        Self { canonicalizer }
    }

    /// Resolve `owner` and `file` concurrently.
    ///
    /// The returned future owns everything it needs, so it can run on a
    /// task while other events are processed. Either side may finish
    /// first; the binding is only produced once both have.
    pub fn bind(
        &self,
        owner: PathBuf,
        file: PathBuf,
    ) -> impl Future<Output = Binding> + Send + 'static {
        let canonicalizer = self.canonicalizer.clone();
        async move {
            let (owner, file) = tokio::join!(
                canonicalizer.canonicalize(&owner),
                canonicalizer.canonicalize(&file)
            );
            Binding { owner, file }
        }
    }
}
