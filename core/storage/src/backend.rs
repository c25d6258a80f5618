//! Storage backend trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use studiosync_common::{Error, Result, StoragePath};

/// Closed set of backend kinds.
///
/// A provider holds at most one backend of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Local,
    GoogleDrive,
    Dropbox,
    S3,
    Custom,
}

impl BackendKind {
    /// Stable identifier used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::GoogleDrive => "google-drive",
            BackendKind::Dropbox => "dropbox",
            BackendKind::S3 => "s3",
            BackendKind::Custom => "custom",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(BackendKind::Local),
            "google-drive" | "gdrive" => Ok(BackendKind::GoogleDrive),
            "dropbox" => Ok(BackendKind::Dropbox),
            "s3" => Ok(BackendKind::S3),
            "custom" => Ok(BackendKind::Custom),
            other => Err(Error::InvalidInput(format!("Unknown backend kind: {}", other))),
        }
    }
}

/// Kind of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One node in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Name relative to the listed directory.
    pub name: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: Option<u64>, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            modified,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: None,
            modified: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Point-in-time attributes of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Size in bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Options for [`StorageBackend::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// MIME type stored alongside the object where the backend supports it.
    pub content_type: Option<String>,
}

/// Options for [`StorageBackend::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Stop after this many entries.
    pub max_results: Option<usize>,
}

impl ListOptions {
    /// Whether `count` entries already satisfy the limit.
    pub fn is_satisfied(&self, count: usize) -> bool {
        self.max_results.is_some_and(|max| count >= max)
    }

    /// Truncate a listing to the limit.
    pub fn apply(&self, mut entries: Vec<Entry>) -> Vec<Entry> {
        if let Some(max) = self.max_results {
            entries.truncate(max);
        }
        entries
    }
}

/// Result of a backend health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub message: String,
}

impl HealthStatus {
    /// Build a status from the outcome of a timed probe.
    pub fn from_probe<T>(started: Instant, outcome: &Result<T>) -> Self {
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(_) => Self {
                healthy: true,
                latency_ms,
                message: "OK".to_string(),
            },
            Err(e) => Self {
                healthy: false,
                latency_ms,
                message: e.to_string(),
            },
        }
    }
}

/// Storage capacity in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub total: u64,
    pub available: u64,
}

/// Capability contract implemented by every storage backend.
///
/// Paths are backend-relative. "Not found" is always reported as
/// [`Error::NotFound`] from `read`, as `Ok(None)` from `metadata` and as
/// `Ok(false)` from `exists`. Listing a missing directory yields an empty
/// vector and deleting a missing object succeeds.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which kind of backend this is.
    fn kind(&self) -> BackendKind;

    /// Store `data` at `path`, replacing any existing object.
    ///
    /// Hierarchical backends create missing parent folders first.
    async fn write(&self, path: &StoragePath, data: Vec<u8>, options: &WriteOptions) -> Result<()>;

    /// Fetch the complete content at `path`.
    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>>;

    /// Delete the object or directory at `path`.
    ///
    /// Directories are only removed together with their contents when
    /// `recursive` is set.
    async fn delete(&self, path: &StoragePath, recursive: bool) -> Result<()>;

    /// List the direct children of the directory at `path`.
    async fn list(&self, path: &StoragePath, options: &ListOptions) -> Result<Vec<Entry>>;

    /// Attributes of the object at `path`, `None` when absent.
    async fn metadata(&self, path: &StoragePath) -> Result<Option<Metadata>>;

    /// Whether an object exists at `path`.
    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        Ok(self.metadata(path).await?.is_some())
    }

    /// Copy an object. Backends with a server-side copy override this.
    async fn copy(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        let data = self.read(from).await?;
        self.write(to, data, &WriteOptions::default()).await
    }

    /// Move an object (copy, then delete the source).
    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        self.copy(from, to).await?;
        self.delete(from, false).await
    }

    /// Create a directory. No-op for backends with implicit directories.
    async fn mkdir(&self, _path: &StoragePath, _recursive: bool) -> Result<()> {
        Ok(())
    }

    /// Issue one cheap read-only call and report latency. Never fails.
    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let outcome = self
            .list(
                &StoragePath::root(),
                &ListOptions {
                    max_results: Some(1),
                },
            )
            .await;
        HealthStatus::from_probe(started, &outcome)
    }

    /// Best-effort capacity report, `None` when the backend has no quota.
    async fn storage_quota(&self) -> Option<StorageQuota> {
        None
    }
}
