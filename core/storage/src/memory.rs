//! In-memory filesystem for tests and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::Entry;
use crate::local::LocalFileSystem;
use studiosync_common::{Error, Result, StoragePath};

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

/// In-memory [`LocalFileSystem`].
///
/// Directories are implicit: a directory exists while any file lives
/// beneath it. All data is lost on drop.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: RwLock<BTreeMap<String, MemoryFile>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> RwLockReadGuard<'_, BTreeMap<String, MemoryFile>> {
        self.files.read().unwrap_or_else(|e| e.into_inner())
    }

    fn files_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, MemoryFile>> {
        self.files.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Override the modification time of a stored file.
    pub fn set_modified(&self, path: &StoragePath, modified: DateTime<Utc>) -> Result<()> {
        let key = path.to_key();
        match self.files_mut().get_mut(&key) {
            Some(file) => {
                file.modified = modified;
                Ok(())
            }
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }
}

fn dir_prefix(path: &StoragePath) -> String {
    if path.is_root() {
        String::new()
    } else {
        format!("{}/", path.to_key())
    }
}

#[async_trait]
impl LocalFileSystem for MemoryFileSystem {
    async fn write(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot write to the root".to_string()));
        }
        let prefix = dir_prefix(path);
        let mut files = self.files_mut();
        if files.keys().any(|k| k.starts_with(&prefix)) {
            return Err(Error::InvalidInput(format!("Path is a directory: {}", path)));
        }
        files.insert(
            path.to_key(),
            MemoryFile {
                data: data.to_vec(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>> {
        self.files()
            .get(&path.to_key())
            .map(|file| file.data.clone())
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    async fn delete(&self, path: &StoragePath) -> Result<()> {
        let key = path.to_key();
        let prefix = dir_prefix(path);
        self.files_mut()
            .retain(|k, _| k != &key && !k.starts_with(&prefix));
        Ok(())
    }

    async fn list(&self, path: &StoragePath) -> Result<Vec<Entry>> {
        let prefix = dir_prefix(path);
        let files = self.files();

        let mut results = Vec::new();
        let mut directories = BTreeSet::new();

        for (key, file) in files.range(prefix.clone()..) {
            let Some(relative) = key.strip_prefix(&prefix) else {
                break;
            };
            match relative.split_once('/') {
                Some((dir, _)) => {
                    directories.insert(dir.to_string());
                }
                None => results.push(Entry::file(
                    relative,
                    Some(file.data.len() as u64),
                    Some(file.modified),
                )),
            }
        }

        results.extend(directories.into_iter().map(Entry::directory));
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    async fn stat(&self, path: &StoragePath) -> Result<Option<Entry>> {
        let name = path.name().unwrap_or_default();
        let files = self.files();

        if let Some(file) = files.get(&path.to_key()) {
            return Ok(Some(Entry::file(
                name,
                Some(file.data.len() as u64),
                Some(file.modified),
            )));
        }

        let prefix = dir_prefix(path);
        if path.is_root() || files.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(Some(Entry::directory(name)));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ListOptions, StorageBackend, WriteOptions};
    use crate::local::LocalBackend;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn path(p: &str) -> StoragePath {
        StoragePath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn test_write_read() {
        let fs = MemoryFileSystem::new();
        fs.write(&path("test.txt"), b"Hello, World!").await.unwrap();
        assert_eq!(fs.read(&path("test.txt")).await.unwrap(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_implicit_directories() {
        let fs = MemoryFileSystem::new();
        fs.write(&path("projects/v1/a/project.od"), &[1]).await.unwrap();
        fs.write(&path("projects/v1/b.od"), &[2]).await.unwrap();
        fs.write(&path("projects/v10/c.od"), &[3]).await.unwrap();

        let listing = fs.list(&path("projects/v1")).await.unwrap();
        let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b.od"]);
        assert!(listing[0].is_directory());

        let stat = fs.stat(&path("projects/v1/a")).await.unwrap().unwrap();
        assert!(stat.is_directory());
        assert!(fs.stat(&path("projects/v2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_tree() {
        let fs = MemoryFileSystem::new();
        fs.write(&path("dir/a"), &[1]).await.unwrap();
        fs.write(&path("dir/sub/b"), &[2]).await.unwrap();
        fs.write(&path("dirty"), &[3]).await.unwrap();

        fs.delete(&path("dir")).await.unwrap();
        assert_eq!(fs.len(), 1);
        assert!(fs.stat(&path("dirty")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cannot_overwrite_directory_with_file() {
        let fs = MemoryFileSystem::new();
        fs.write(&path("dir/a"), &[1]).await.unwrap();
        assert!(fs.write(&path("dir"), &[2]).await.is_err());
    }

    #[tokio::test]
    async fn test_set_modified() {
        let fs = MemoryFileSystem::new();
        let past = Utc::now() - chrono::Duration::days(1);
        fs.write(&path("a"), &[1]).await.unwrap();
        fs.set_modified(&path("a"), past).unwrap();

        let entry = fs.stat(&path("a")).await.unwrap().unwrap();
        assert_eq!(entry.modified, Some(past));
        assert!(fs.set_modified(&path("missing"), past).is_err());
    }

    #[tokio::test]
    async fn test_backend_list_on_missing_dir_is_empty() {
        let backend = LocalBackend::new(Arc::new(MemoryFileSystem::new()));
        let entries = backend.list(&path("nowhere"), &ListOptions::default()).await.unwrap();
        assert!(entries.is_empty());
    }

    proptest! {
        #[test]
        fn prop_write_then_read_is_identity(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            name in "[a-z]{1,12}",
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let backend = LocalBackend::new(Arc::new(MemoryFileSystem::new()));
            let target = path(&format!("samples/v2/{}", name));

            let read = runtime.block_on(async {
                backend.write(&target, data.clone(), &WriteOptions::default()).await.unwrap();
                backend.read(&target).await.unwrap()
            });
            prop_assert_eq!(read, data);
        }
    }
}
