//! Canonical path identities.
//!
//! Two paths that name the same file should map to one identity so that a
//! file reachable through several symlinks gets exactly one watch and one
//! cache key. Paths whose real location sits under a transient root (for
//! example the `/private` view macOS uses for temp directories) keep their
//! original spelling instead.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

/// Stable key used for watches and cache eviction.
///
/// Cheap to clone; the path is interned behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<PathBuf>);

impl Identity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(Arc::new(path.into()))
    }

    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// String form used as a cache key and in update batches.
    pub fn key(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&Path> for Identity {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

/// Outcome of canonicalizing a path.
///
/// Every variant yields a usable identity; the variant records which
/// decision was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    /// Real path lookup succeeded and was used.
    Resolved(Identity),
    /// Real path lies under a transient root; the original path was kept.
    Transient(Identity),
    /// Real path lookup failed; the original path was kept.
    Unresolved(Identity),
}

impl Canonical {
    pub fn identity(&self) -> &Identity {
        match self {
            Canonical::Resolved(id) | Canonical::Transient(id) | Canonical::Unresolved(id) => id,
        }
    }

    pub fn into_identity(self) -> Identity {
        match self {
            Canonical::Resolved(id) | Canonical::Transient(id) | Canonical::Unresolved(id) => id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Canonical::Resolved(_))
    }
}

/// Filesystem queries needed for canonicalization.
#[async_trait]
pub trait PathResolver: Send + Sync {
    /// Resolve symlinks and relative components.
    async fn real_path(&self, path: &Path) -> io::Result<PathBuf>;

    /// Whether the path itself (not its symlink target) is a directory.
    async fn is_dir(&self, path: &Path) -> io::Result<bool>;
}

/// Resolver backed by `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsResolver;

#[async_trait]
impl PathResolver for FsResolver {
    async fn real_path(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::canonicalize(path).await
    }

    async fn is_dir(&self, path: &Path) -> io::Result<bool> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        Ok(meta.is_dir())
    }
}

/// Roots under which symlink resolution is skipped.
///
/// An entry with a single normal component (`"private"`) matches the
/// topmost directory of the resolved path. An absolute entry
/// (`"/var/folders"`) matches as a path prefix.
#[derive(Debug, Clone, Default)]
pub struct TransientRoots {
    roots: Vec<PathBuf>,
}

impl TransientRoots {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Check whether a resolved path falls under one of the roots.
    pub fn contains(&self, resolved: &Path) -> bool {
        let top = resolved.components().find_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        });

        self.roots.iter().any(|root| {
            if root.is_absolute() {
                resolved.starts_with(root)
            } else {
                top.is_some_and(|top| root.as_os_str() == top)
            }
        })
    }
}

/// Maps raw paths to canonical identities.
pub struct Canonicalizer {
    resolver: Arc<dyn PathResolver>,
    transient: TransientRoots,
}

impl Canonicalizer {
    pub fn new(resolver: Arc<dyn PathResolver>, transient: TransientRoots) -> Self {
        Self {
            resolver,
            transient,
        }
    }

    /// Canonicalize a path, never failing.
    pub async fn canonicalize(&self, path: &Path) -> Canonical {
        match self.resolver.real_path(path).await {
            Ok(real) if self.transient.contains(&real) => Canonical::Transient(path.into()),
            Ok(real) => Canonical::Resolved(Identity::new(real)),
            Err(e) => {
                crate::debug_event!(
                    "canonical",
                    "unresolved",
                    "{}: {e}, using raw path",
                    path.display()
                );
                Canonical::Unresolved(path.into())
            }
        }
    }

    /// Whether a discovered path is a directory and should not be watched.
    ///
    /// Lookup errors answer `false`; the path is then treated as a file.
    pub async fn is_dir(&self, path: &Path) -> bool {
        self.resolver.is_dir(path).await.unwrap_or(false)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeResolver;
    use super::*;

    fn canonicalizer(resolver: FakeResolver, roots: &[&str]) -> Canonicalizer {
        Canonicalizer::new(Arc::new(resolver), TransientRoots::new(roots.iter().copied()))
    }

    #[tokio::test]
    async fn test_symlinks_collapse_to_one_identity() {
        let resolver = FakeResolver::default();
        resolver.link("/proj/link/a.js", "/proj/src/a.js");
        let canon = canonicalizer(resolver, &["private"]);

        let via_link = canon.canonicalize(Path::new("/proj/link/a.js")).await;
        let direct = canon.canonicalize(Path::new("/proj/src/a.js")).await;

        assert!(via_link.is_resolved());
        assert_eq!(via_link.identity(), direct.identity());
        assert_eq!(via_link.identity().as_path(), Path::new("/proj/src/a.js"));
    }

    #[tokio::test]
    async fn test_transient_root_keeps_original_path() {
        let resolver = FakeResolver::default();
        resolver.link("/tmp/build/a.js", "/private/tmp/build/a.js");
        let canon = canonicalizer(resolver, &["private"]);

        let result = canon.canonicalize(Path::new("/tmp/build/a.js")).await;

        assert_eq!(
            result,
            Canonical::Transient(Identity::new("/tmp/build/a.js"))
        );
    }

    #[tokio::test]
    async fn test_failed_lookup_falls_back_to_raw_path() {
        let resolver = FakeResolver::default();
        resolver.missing("/proj/gone.js");
        let canon = canonicalizer(resolver, &["private"]);

        let result = canon.canonicalize(Path::new("/proj/gone.js")).await;

        assert_eq!(result, Canonical::Unresolved(Identity::new("/proj/gone.js")));
    }

    #[test]
    fn test_transient_roots_match_top_component_only() {
        let roots = TransientRoots::new(["private"]);

        assert!(roots.contains(Path::new("/private/var/folders/x")));
        assert!(!roots.contains(Path::new("/home/me/private/x")));
        assert!(!roots.contains(Path::new("/privateer/x")));
    }

    #[test]
    fn test_transient_roots_absolute_prefix() {
        let roots = TransientRoots::new(["/var/folders"]);

        assert!(roots.contains(Path::new("/var/folders/ab/T/a.js")));
        assert!(!roots.contains(Path::new("/var/log/a.js")));
        assert!(!TransientRoots::default().contains(Path::new("/private/a.js")));
    }

    #[tokio::test]
    async fn test_is_dir_defaults_to_false_on_error() {
        let resolver = FakeResolver::default();
        resolver.dir("/proj/pkg");
        let canon = canonicalizer(resolver, &[]);

        assert!(canon.is_dir(Path::new("/proj/pkg")).await);
        assert!(!canon.is_dir(Path::new("/proj/pkg/package.json")).await);
    }
}
