//! Local storage backend and the filesystem collaborator it delegates to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::backend::{
    BackendKind, Entry, EntryKind, ListOptions, Metadata, StorageBackend, WriteOptions,
};
use studiosync_common::{Error, Result, StoragePath};

/// Minimal filesystem API the local backend is built on.
///
/// Implementations create parent directories implicitly on `write`, remove
/// whole trees on `delete`, and never retry on their own.
#[async_trait]
pub trait LocalFileSystem: Send + Sync {
    async fn write(&self, path: &StoragePath, data: &[u8]) -> Result<()>;

    /// Fails with [`Error::NotFound`] when no file exists at `path`.
    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>>;

    /// Removes a file or a directory tree. Missing paths are not an error.
    async fn delete(&self, path: &StoragePath) -> Result<()>;

    /// Direct children of a directory, empty when it does not exist.
    async fn list(&self, path: &StoragePath) -> Result<Vec<Entry>>;

    /// Describe a single path, `None` when absent.
    async fn stat(&self, path: &StoragePath) -> Result<Option<Entry>>;
}

/// Filesystem rooted in a local directory.
pub struct DiskFileSystem {
    root: PathBuf,
}

impl DiskFileSystem {
    /// Create a filesystem rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, path: &StoragePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn to_entry(name: String, fs_meta: &std::fs::Metadata) -> Entry {
        if fs_meta.is_dir() {
            return Entry::directory(name);
        }
        let modified: Option<DateTime<Utc>> = fs_meta.modified().ok().map(Into::into);
        Entry::file(name, Some(fs_meta.len()), modified)
    }
}

/// A path under an existing file reports `NotADirectory`, not `NotFound`.
fn is_missing(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
    )
}

#[async_trait]
impl LocalFileSystem for DiskFileSystem {
    async fn write(&self, path: &StoragePath, data: &[u8]) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot write to the root".to_string()));
        }
        let fs_path = self.to_fs_path(path);

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&fs_path, data).await?;
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path);

        match fs::metadata(&fs_path).await {
            Ok(fs_meta) if fs_meta.is_dir() => {
                return Err(Error::InvalidInput(format!("Cannot read directory: {}", path)))
            }
            Ok(_) => {}
            Err(e) if is_missing(&e) => {
                return Err(Error::NotFound(format!("File not found: {}", path)))
            }
            Err(e) => return Err(e.into()),
        }

        match fs::read(&fs_path).await {
            Ok(data) => Ok(data),
            Err(e) if is_missing(&e) => Err(Error::NotFound(format!("File not found: {}", path))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &StoragePath) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        let fs_meta = match fs::metadata(&fs_path).await {
            Ok(meta) => meta,
            Err(e) if is_missing(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if fs_meta.is_dir() {
            fs::remove_dir_all(&fs_path).await?;
        } else {
            fs::remove_file(&fs_path).await?;
        }
        Ok(())
    }

    async fn list(&self, path: &StoragePath) -> Result<Vec<Entry>> {
        let fs_path = self.to_fs_path(path);

        let mut entries = match fs::read_dir(&fs_path).await {
            Ok(entries) => entries,
            Err(e) if is_missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                debug!("Skipping non UTF-8 entry in {}", fs_path.display());
                continue;
            };
            let fs_meta = entry.metadata().await?;
            results.push(Self::to_entry(name, &fs_meta));
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(results)
    }

    async fn stat(&self, path: &StoragePath) -> Result<Option<Entry>> {
        let fs_path = self.to_fs_path(path);

        match fs::metadata(&fs_path).await {
            Ok(fs_meta) => {
                let name = path.name().unwrap_or_default().to_string();
                Ok(Some(Self::to_entry(name, &fs_meta)))
            }
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// The always-present primary backend.
///
/// Directories are emulated by the underlying filesystem, so `mkdir` is a
/// no-op and writes create their parents.
pub struct LocalBackend {
    fs: Arc<dyn LocalFileSystem>,
    kind: BackendKind,
}

impl LocalBackend {
    pub fn new(fs: Arc<dyn LocalFileSystem>) -> Self {
        Self {
            fs,
            kind: BackendKind::Local,
        }
    }

    /// Local backend rooted at a directory on disk.
    pub fn on_disk(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(DiskFileSystem::new(root)?)))
    }

    /// Report a different kind, for filesystem-backed stand-ins of cloud
    /// backends.
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn filesystem(&self) -> &Arc<dyn LocalFileSystem> {
        &self.fs
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn write(&self, path: &StoragePath, data: Vec<u8>, _options: &WriteOptions) -> Result<()> {
        self.fs.write(path, &data).await
    }

    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>> {
        self.fs.read(path).await
    }

    async fn delete(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        match self.fs.stat(path).await? {
            None => Ok(()),
            Some(entry) if entry.kind == EntryKind::Directory && !recursive => {
                if self.fs.list(path).await?.is_empty() {
                    self.fs.delete(path).await
                } else {
                    Err(Error::InvalidInput(format!("Directory not empty: {}", path)))
                }
            }
            Some(_) => self.fs.delete(path).await,
        }
    }

    async fn list(&self, path: &StoragePath, options: &ListOptions) -> Result<Vec<Entry>> {
        let entries = self.fs.list(path).await?;
        Ok(options.apply(entries))
    }

    async fn metadata(&self, path: &StoragePath) -> Result<Option<Metadata>> {
        Ok(self.fs.stat(path).await?.map(|entry| Metadata {
            size: entry.size.unwrap_or(0),
            modified: entry.modified,
            created: None,
            content_type: None,
        }))
    }
}
