//! Routing of paths and scopes to cloud backends.

use std::collections::BTreeSet;
use std::sync::Arc;

use studiosync_common::{StoragePath, StorageScope};
use studiosync_storage::{BackendKind, StorageBackend};

/// Scope a path belongs to, by prefix of its normalized form.
///
/// Matching is on the raw string, so `projects-old/x` still routes to
/// [`StorageScope::Projects`].
pub fn scope_from_path(path: &StoragePath) -> StorageScope {
    let key = path.to_key();
    if key.starts_with("projects") {
        StorageScope::Projects
    } else if key.starts_with("samples") {
        StorageScope::Samples
    } else if key.starts_with("soundfont") {
        StorageScope::Soundfonts
    } else {
        StorageScope::All
    }
}

/// What a sync operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// The scope's fixed prefix.
    Scope(StorageScope),
    /// A literal path, used as-is.
    Path(StoragePath),
}

impl SyncTarget {
    pub fn base_path(&self) -> StoragePath {
        match self {
            SyncTarget::Scope(scope) => scope.base_path(),
            SyncTarget::Path(path) => path.clone(),
        }
    }

    /// Scope used for backend selection.
    pub fn scope(&self) -> StorageScope {
        match self {
            SyncTarget::Scope(scope) => *scope,
            SyncTarget::Path(path) => scope_from_path(path),
        }
    }
}

impl Default for SyncTarget {
    fn default() -> Self {
        SyncTarget::Scope(StorageScope::All)
    }
}

impl From<StorageScope> for SyncTarget {
    fn from(scope: StorageScope) -> Self {
        SyncTarget::Scope(scope)
    }
}

impl From<StoragePath> for SyncTarget {
    fn from(path: StoragePath) -> Self {
        SyncTarget::Path(path)
    }
}

/// A registered cloud backend with its routing parameters.
#[derive(Clone)]
pub struct BackendConfig {
    pub backend: Arc<dyn StorageBackend>,
    pub scopes: BTreeSet<StorageScope>,
    pub priority: i32,
}

impl BackendConfig {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        scopes: impl IntoIterator<Item = StorageScope>,
        priority: i32,
    ) -> Self {
        Self {
            backend,
            scopes: scopes.into_iter().collect(),
            priority,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Whether this backend serves `scope`, directly or through `All`.
    pub fn covers(&self, scope: StorageScope) -> bool {
        self.scopes.contains(&scope) || self.scopes.contains(&StorageScope::All)
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind())
            .field("scopes", &self.scopes)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Highest-priority config covering `scope`. On equal priority the
/// earliest registered entry wins.
pub fn select_backend(registry: &[BackendConfig], scope: StorageScope) -> Option<&BackendConfig> {
    registry
        .iter()
        .filter(|config| config.covers(scope))
        .fold(None, |best: Option<&BackendConfig>, config| match best {
            Some(current) if current.priority >= config.priority => Some(current),
            _ => Some(config),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use studiosync_storage::{LocalBackend, MemoryFileSystem};

    fn backend(kind: BackendKind) -> Arc<dyn StorageBackend> {
        Arc::new(LocalBackend::new(Arc::new(MemoryFileSystem::new())).with_kind(kind))
    }

    fn sp(p: &str) -> StoragePath {
        StoragePath::parse(p).unwrap()
    }

    #[test]
    fn test_scope_from_path() {
        assert_eq!(scope_from_path(&sp("projects/x/y")), StorageScope::Projects);
        assert_eq!(scope_from_path(&sp("/projects/v1/song.od")), StorageScope::Projects);
        assert_eq!(scope_from_path(&sp("samples/z")), StorageScope::Samples);
        assert_eq!(scope_from_path(&sp("soundfont/x")), StorageScope::Soundfonts);
        assert_eq!(scope_from_path(&sp("unrelated/x")), StorageScope::All);
        assert_eq!(scope_from_path(&StoragePath::root()), StorageScope::All);
    }

    #[test]
    fn test_sync_target_base_path() {
        assert_eq!(SyncTarget::from(StorageScope::Samples).base_path().to_key(), "samples/v2");
        assert!(SyncTarget::default().base_path().is_root());

        let target = SyncTarget::from(sp("soundfont/piano"));
        assert_eq!(target.base_path().to_key(), "soundfont/piano");
        assert_eq!(target.scope(), StorageScope::Soundfonts);
    }

    #[test]
    fn test_select_highest_priority() {
        let registry = vec![
            BackendConfig::new(backend(BackendKind::Dropbox), [StorageScope::Projects], 1),
            BackendConfig::new(backend(BackendKind::S3), [StorageScope::Projects], 5),
        ];
        let chosen = select_backend(&registry, StorageScope::Projects).unwrap();
        assert_eq!(chosen.kind(), BackendKind::S3);
        assert!(select_backend(&registry, StorageScope::Samples).is_none());
    }

    #[test]
    fn test_all_scope_is_catch_all() {
        let registry = vec![
            BackendConfig::new(backend(BackendKind::GoogleDrive), [StorageScope::All], 0),
            BackendConfig::new(backend(BackendKind::S3), [StorageScope::Samples], 2),
        ];
        assert_eq!(
            select_backend(&registry, StorageScope::Soundfonts).unwrap().kind(),
            BackendKind::GoogleDrive
        );
        assert_eq!(
            select_backend(&registry, StorageScope::Samples).unwrap().kind(),
            BackendKind::S3
        );
    }

    #[test]
    fn test_ties_go_to_earliest_registration() {
        let registry = vec![
            BackendConfig::new(backend(BackendKind::Dropbox), [StorageScope::All], 3),
            BackendConfig::new(backend(BackendKind::S3), [StorageScope::All], 3),
        ];
        for _ in 0..10 {
            assert_eq!(
                select_backend(&registry, StorageScope::Projects).unwrap().kind(),
                BackendKind::Dropbox
            );
        }
    }
}
