//! The storage provider: local-first facade over the primary backend and
//! the registered cloud backends.

use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use studiosync_common::{Error, Result, StoragePath, StorageScope};
use studiosync_config::{StorageConfiguration, DEFAULT_SYNC_DEBOUNCE_MS};
use studiosync_storage::{
    create_backend, BackendKind, Entry, HealthStatus, ListOptions, Metadata, StorageBackend,
    StorageQuota, WriteOptions as BackendWriteOptions,
};

use crate::conflict::{resolve_download, DownloadDecision};
use crate::debounce::Debouncer;
use crate::events::{ChangeEvent, ChangeKind, ListenerId, Listeners};
use crate::result::{SyncDirection, SyncOptions, SyncProgress, SyncResult};
use crate::scope::{scope_from_path, select_backend, BackendConfig, SyncTarget};

/// Construction parameters.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Schedule an upload sync of the written scope after each write.
    pub auto_sync: bool,
    /// Quiet period before an automatic sync fires.
    pub sync_debounce: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_debounce: Duration::from_millis(DEFAULT_SYNC_DEBOUNCE_MS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    /// Do not schedule an automatic sync for this write.
    pub skip_sync: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Try the scope's cloud backend before the local copy.
    pub prefer_cloud: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub recursive: bool,
    /// Only delete the local copy.
    pub skip_cloud: bool,
}

struct Inner {
    local: Arc<dyn StorageBackend>,
    /// At most one entry per backend kind, in registration order.
    registry: RwLock<Vec<BackendConfig>>,
    listeners: Listeners,
    auto_sync: AtomicBool,
    debounce_ms: AtomicU64,
    syncing: AtomicBool,
    debouncer: Debouncer,
}

impl Inner {
    fn registry(&self) -> RwLockReadGuard<'_, Vec<BackendConfig>> {
        self.registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Vec<BackendConfig>> {
        self.registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cloud_for(&self, scope: StorageScope) -> Option<Arc<dyn StorageBackend>> {
        select_backend(&self.registry(), scope).map(|config| config.backend.clone())
    }

    fn all_backends(&self) -> Vec<Arc<dyn StorageBackend>> {
        std::iter::once(self.local.clone())
            .chain(self.registry().iter().map(|config| config.backend.clone()))
            .collect()
    }
}

/// Clears the sync flag on every exit path.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Local-first storage facade.
///
/// Writes always land on the local backend. Cloud backends are routed to by
/// scope and priority, and are used as the read fallback, the delete mirror
/// and the sync counterpart. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct StorageProvider {
    inner: Arc<Inner>,
}

impl StorageProvider {
    pub fn new(local: Arc<dyn StorageBackend>, options: ProviderOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                registry: RwLock::new(Vec::new()),
                listeners: Listeners::default(),
                auto_sync: AtomicBool::new(options.auto_sync),
                debounce_ms: AtomicU64::new(options.sync_debounce.as_millis() as u64),
                syncing: AtomicBool::new(false),
                debouncer: Debouncer::default(),
            }),
        }
    }

    /// Build a provider and its cloud registry from persisted settings.
    ///
    /// A cloud entry that cannot be constructed is logged and left out.
    pub fn from_configuration(local: Arc<dyn StorageBackend>, config: &StorageConfiguration) -> Self {
        let provider = Self::new(
            local,
            ProviderOptions {
                auto_sync: config.auto_sync,
                sync_debounce: Duration::from_millis(config.sync_debounce_ms),
            },
        );

        for cloud in &config.cloud_backends {
            match create_backend(&cloud.settings) {
                Ok(backend) => provider.add_cloud_backend(BackendConfig::new(
                    backend,
                    cloud.scopes.iter().copied(),
                    cloud.priority,
                )),
                Err(e) => warn!(kind = %cloud.kind(), "Skipping cloud backend: {}", e),
            }
        }
        provider
    }

    /// Register a cloud backend. A backend of the same kind is replaced and
    /// the new one takes the last registration slot.
    pub fn add_cloud_backend(&self, config: BackendConfig) {
        let kind = config.kind();
        let mut registry = self.inner.registry_mut();
        registry.retain(|existing| existing.kind() != kind);
        info!(kind = %kind, priority = config.priority, "Cloud backend registered");
        registry.push(config);
    }

    /// Returns whether a backend of that kind was registered.
    pub fn remove_cloud_backend(&self, kind: BackendKind) -> bool {
        let mut registry = self.inner.registry_mut();
        let before = registry.len();
        registry.retain(|existing| existing.kind() != kind);
        registry.len() != before
    }

    /// Registered cloud backends in registration order.
    pub fn backends(&self) -> Vec<BackendConfig> {
        self.inner.registry().clone()
    }

    pub fn local(&self) -> Arc<dyn StorageBackend> {
        self.inner.local.clone()
    }

    /// The backend `path` would be served from: the scope's cloud backend
    /// when `prefer_cloud` and one is registered, else the local backend.
    pub fn get_backend_for_path(&self, path: &StoragePath, prefer_cloud: bool) -> Arc<dyn StorageBackend> {
        if prefer_cloud {
            if let Some(cloud) = self.inner.cloud_for(scope_from_path(path)) {
                return cloud;
            }
        }
        self.inner.local.clone()
    }

    pub fn auto_sync(&self) -> bool {
        self.inner.auto_sync.load(Ordering::Relaxed)
    }

    /// Disabling auto-sync also drops any pending automatic syncs.
    pub fn set_auto_sync(&self, enabled: bool) {
        self.inner.auto_sync.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.inner.debouncer.cancel_all();
        }
    }

    pub fn set_sync_debounce(&self, debounce: Duration) {
        self.inner
            .debounce_ms
            .store(debounce.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn off_change(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn emit(&self, kind: ChangeKind, path: &StoragePath) {
        self.inner.listeners.emit(&ChangeEvent::new(kind, path.clone()));
    }

    fn schedule_sync(&self, scope: StorageScope) {
        let weak = Arc::downgrade(&self.inner);
        let delay = Duration::from_millis(self.inner.debounce_ms.load(Ordering::Relaxed));

        self.inner.debouncer.schedule(scope, delay, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let provider = StorageProvider { inner };
            match provider
                .sync_exclusive(scope.into(), SyncOptions::new(SyncDirection::Upload))
                .await
            {
                Ok(result) if !result.success => {
                    warn!(scope = %scope, errors = result.errors.len(), "Automatic sync had failures");
                }
                Ok(_) => {}
                // Another sync holds the flag; try again after another quiet period.
                Err(e) => {
                    debug!(scope = %scope, "Automatic sync deferred: {}", e);
                    if provider.auto_sync() {
                        provider.schedule_sync(scope);
                    }
                }
            }
        });
    }

    /// Write to the local backend, notify listeners and, with auto-sync on,
    /// re-arm the debounced sync of the path's scope.
    pub async fn write(&self, path: &StoragePath, data: Vec<u8>, options: &WriteOptions) -> Result<()> {
        let backend_options = BackendWriteOptions {
            content_type: options.content_type.clone(),
        };
        self.inner.local.write(path, data, &backend_options).await?;
        self.emit(ChangeKind::Written, path);

        if self.auto_sync() && !options.skip_sync {
            self.schedule_sync(scope_from_path(path));
        }
        Ok(())
    }

    /// Read with local acting as a read-through cache for cloud content.
    ///
    /// When every source fails the error of the local read is returned.
    pub async fn read(&self, path: &StoragePath, options: &ReadOptions) -> Result<Vec<u8>> {
        let cloud = self.inner.cloud_for(scope_from_path(path));

        if options.prefer_cloud {
            if let Some(cloud) = &cloud {
                match cloud.read(path).await {
                    Ok(data) => return Ok(data),
                    Err(e) => debug!(path = %path, "Cloud read failed, trying local: {}", e),
                }
            }
        }

        let local_error = match self.inner.local.read(path).await {
            Ok(data) => return Ok(data),
            Err(e) => e,
        };

        // With prefer_cloud the cloud has already been tried.
        let Some(cloud) = cloud.filter(|_| !options.prefer_cloud) else {
            return Err(local_error);
        };

        match cloud.read(path).await {
            Ok(data) => {
                if let Err(e) = self
                    .inner
                    .local
                    .write(path, data.clone(), &BackendWriteOptions::default())
                    .await
                {
                    warn!(path = %path, "Failed to cache cloud content locally: {}", e);
                }
                Ok(data)
            }
            Err(e) => {
                debug!(path = %path, "Cloud fallback failed: {}", e);
                Err(local_error)
            }
        }
    }

    /// Delete locally, then best-effort from the scope's cloud backend.
    pub async fn delete(&self, path: &StoragePath, options: &DeleteOptions) -> Result<()> {
        self.inner.local.delete(path, options.recursive).await?;

        if !options.skip_cloud {
            if let Some(cloud) = self.inner.cloud_for(scope_from_path(path)) {
                if let Err(e) = cloud.delete(path, options.recursive).await {
                    warn!(path = %path, kind = %cloud.kind(), "Cloud delete failed: {}", e);
                }
            }
        }

        self.emit(ChangeKind::Deleted, path);
        Ok(())
    }

    pub async fn list(&self, path: &StoragePath, prefer_cloud: bool) -> Result<Vec<Entry>> {
        self.get_backend_for_path(path, prefer_cloud)
            .list(path, &ListOptions::default())
            .await
    }

    pub async fn exists(&self, path: &StoragePath, check_cloud: bool) -> Result<bool> {
        self.get_backend_for_path(path, check_cloud).exists(path).await
    }

    pub async fn metadata(&self, path: &StoragePath, check_cloud: bool) -> Result<Option<Metadata>> {
        self.get_backend_for_path(path, check_cloud).metadata(path).await
    }

    /// Copy on the local backend and mirror the copy to the cloud backend
    /// of the source's scope when it has the source.
    pub async fn copy(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        self.inner.local.copy(from, to).await?;
        self.mirror(from, to, false).await;
        self.emit(ChangeKind::Written, to);
        Ok(())
    }

    /// Move on the local backend, mirrored like [`copy`](Self::copy).
    pub async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        self.inner.local.rename(from, to).await?;
        self.mirror(from, to, true).await;
        self.emit(ChangeKind::Deleted, from);
        self.emit(ChangeKind::Written, to);
        Ok(())
    }

    async fn mirror(&self, from: &StoragePath, to: &StoragePath, is_move: bool) {
        let Some(cloud) = self.inner.cloud_for(scope_from_path(from)) else {
            return;
        };
        let outcome = match cloud.exists(from).await {
            Ok(false) => return,
            Ok(true) if is_move => cloud.rename(from, to).await,
            Ok(true) => cloud.copy(from, to).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(from = %from, to = %to, kind = %cloud.kind(), "Cloud mirror failed: {}", e);
        }
    }

    /// Reconcile local and cloud content under `target`.
    ///
    /// Only one sync runs at a time; a concurrent call returns a failed
    /// result immediately. Per-file failures are collected in the result.
    pub async fn sync(&self, target: impl Into<SyncTarget>, options: SyncOptions) -> SyncResult {
        let target = target.into();
        let key = target.base_path().to_key();
        match self.sync_exclusive(target, options).await {
            Ok(result) => result,
            Err(e) => SyncResult::failed(key, e),
        }
    }

    /// Like [`sync`](Self::sync), but a held sync flag is reported as
    /// `Err(Error::AlreadyInProgress)`.
    async fn sync_exclusive(&self, target: SyncTarget, options: SyncOptions) -> Result<SyncResult> {
        let base = target.base_path();

        let Some(cloud) = self.inner.cloud_for(target.scope()) else {
            return Ok(SyncResult::failed(base.to_key(), "No cloud backend configured"));
        };
        let Some(_guard) = SyncGuard::acquire(&self.inner.syncing) else {
            return Err(Error::AlreadyInProgress("A sync is already running".to_string()));
        };

        info!(
            path = %base,
            direction = ?options.direction,
            kind = %cloud.kind(),
            "Starting sync"
        );
        let mut result = SyncResult::default();

        match options.direction {
            SyncDirection::Upload => self.upload(cloud.as_ref(), &base, &options, &mut result).await,
            SyncDirection::Download => {
                self.download(cloud.as_ref(), &base, &options, &mut result).await
            }
            SyncDirection::Both => {
                self.upload(cloud.as_ref(), &base, &options, &mut result).await;
                self.download(cloud.as_ref(), &base, &options, &mut result).await;
            }
        }

        info!(
            path = %base,
            uploaded = result.files_uploaded,
            downloaded = result.files_downloaded,
            errors = result.errors.len(),
            "Sync finished"
        );
        self.emit(ChangeKind::Synced, &base);
        Ok(result)
    }

    async fn upload(
        &self,
        cloud: &dyn StorageBackend,
        base: &StoragePath,
        options: &SyncOptions,
        result: &mut SyncResult,
    ) {
        let local = self.inner.local.as_ref();
        let files = match collect_files(local, base).await {
            Ok(files) => files,
            Err(e) => {
                result.record_error(base.to_key(), e);
                return;
            }
        };

        let total = files.len();
        for (completed, (path, _)) in files.iter().enumerate() {
            report(options, total, completed, path);
            let outcome = async {
                let data = local.read(path).await?;
                cloud.write(path, data, &BackendWriteOptions::default()).await
            }
            .await;

            match outcome {
                Ok(()) => result.files_uploaded += 1,
                Err(e) => {
                    warn!(path = %path, "Upload failed: {}", e);
                    result.record_error(path.to_key(), e);
                }
            }
        }
        report(options, total, total, base);
    }

    async fn download(
        &self,
        cloud: &dyn StorageBackend,
        base: &StoragePath,
        options: &SyncOptions,
        result: &mut SyncResult,
    ) {
        let local = self.inner.local.as_ref();
        let files = match collect_files(cloud, base).await {
            Ok(files) => files,
            Err(e) => {
                result.record_error(base.to_key(), e);
                return;
            }
        };

        let total = files.len();
        for (completed, (path, entry)) in files.iter().enumerate() {
            report(options, total, completed, path);
            let outcome: Result<bool> = async {
                let local_modified = local.metadata(path).await?.and_then(|m| m.modified);
                let cloud_modified = match (local_modified, entry.modified) {
                    (Some(_), None) => cloud.metadata(path).await?.and_then(|m| m.modified),
                    (_, modified) => modified,
                };

                if resolve_download(local_modified, cloud_modified) == DownloadDecision::KeepLocal {
                    debug!(path = %path, "Local copy is newer, skipping");
                    return Ok(false);
                }
                let data = cloud.read(path).await?;
                local.write(path, data, &BackendWriteOptions::default()).await?;
                Ok(true)
            }
            .await;

            match outcome {
                Ok(true) => result.files_downloaded += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %path, "Download failed: {}", e);
                    result.record_error(path.to_key(), e);
                }
            }
        }
        report(options, total, total, base);
    }

    /// Probe every backend, local included. Never fails.
    pub async fn health_check(&self) -> HashMap<BackendKind, HealthStatus> {
        let backends = self.inner.all_backends();
        join_all(
            backends
                .iter()
                .map(|backend| async move { (backend.kind(), backend.health_check().await) }),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Quota of every backend, `None` where a backend has none.
    pub async fn storage_quotas(&self) -> HashMap<BackendKind, Option<StorageQuota>> {
        let backends = self.inner.all_backends();
        join_all(
            backends
                .iter()
                .map(|backend| async move { (backend.kind(), backend.storage_quota().await) }),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Drop pending automatic syncs. A sync already running is unaffected.
    pub fn cancel_pending_syncs(&self) {
        self.inner.debouncer.cancel_all();
    }

    pub fn pending_syncs(&self) -> usize {
        self.inner.debouncer.pending_count()
    }
}

fn report(options: &SyncOptions, total: usize, completed: usize, current: &StoragePath) {
    if let Some(on_progress) = &options.on_progress {
        on_progress(&SyncProgress {
            total,
            completed,
            current_file: current.to_key(),
            bytes_transferred: 0,
            bytes_total: 0,
        });
    }
}

/// Every file under `dir`, depth-first in listing order.
fn collect_files<'a>(
    backend: &'a dyn StorageBackend,
    dir: &'a StoragePath,
) -> BoxFuture<'a, Result<Vec<(StoragePath, Entry)>>> {
    Box::pin(async move {
        let mut files = Vec::new();
        for entry in backend.list(dir, &ListOptions::default()).await? {
            let path = dir.join(&entry.name)?;
            if entry.is_directory() {
                files.extend(collect_files(backend, &path).await?);
            } else {
                files.push((path, entry));
            }
        }
        Ok(files)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;
    use studiosync_config::CloudBackendConfig;
    use studiosync_storage::{CloudBackendSettings, LocalBackend, MemoryFileSystem, S3Settings};

    fn sp(p: &str) -> StoragePath {
        StoragePath::parse(p).unwrap()
    }

    fn memory(kind: BackendKind) -> (Arc<MemoryFileSystem>, Arc<dyn StorageBackend>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(fs.clone()).with_kind(kind));
        (fs, backend)
    }

    fn manual_provider() -> (Arc<MemoryFileSystem>, StorageProvider) {
        let (fs, local) = memory(BackendKind::Local);
        let provider = StorageProvider::new(
            local,
            ProviderOptions {
                auto_sync: false,
                ..ProviderOptions::default()
            },
        );
        (fs, provider)
    }

    fn with_cloud(provider: &StorageProvider, kind: BackendKind) -> Arc<dyn StorageBackend> {
        let (_, cloud) = memory(kind);
        provider.add_cloud_backend(BackendConfig::new(cloud.clone(), [StorageScope::All], 0));
        cloud
    }

    /// Delegates to `inner`, failing selected operations.
    struct FaultyBackend {
        inner: Arc<dyn StorageBackend>,
        fail_write: Option<StoragePath>,
        fail_reads: bool,
        fail_deletes: bool,
        write_delay: Option<Duration>,
    }

    impl FaultyBackend {
        fn wrap(inner: Arc<dyn StorageBackend>) -> Self {
            Self {
                inner,
                fail_write: None,
                fail_reads: false,
                fail_deletes: false,
                write_delay: None,
            }
        }
    }

    #[async_trait]
    impl StorageBackend for FaultyBackend {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }

        async fn write(&self, path: &StoragePath, data: Vec<u8>, options: &BackendWriteOptions) -> Result<()> {
            if let Some(delay) = self.write_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_write.as_ref() == Some(path) {
                return Err(Error::Network("quota exceeded".to_string()));
            }
            self.inner.write(path, data, options).await
        }

        async fn read(&self, path: &StoragePath) -> Result<Vec<u8>> {
            if self.fail_reads {
                return Err(Error::Network("cloud unreachable".to_string()));
            }
            self.inner.read(path).await
        }

        async fn delete(&self, path: &StoragePath, recursive: bool) -> Result<()> {
            if self.fail_deletes {
                return Err(Error::Network("cloud unreachable".to_string()));
            }
            self.inner.delete(path, recursive).await
        }

        async fn list(&self, path: &StoragePath, options: &ListOptions) -> Result<Vec<Entry>> {
            self.inner.list(path, options).await
        }

        async fn metadata(&self, path: &StoragePath) -> Result<Option<Metadata>> {
            self.inner.metadata(path).await
        }
    }

    fn record_events(provider: &StorageProvider) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        provider.on_change(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[tokio::test]
    async fn test_write_goes_local_and_notifies() {
        let (fs, provider) = manual_provider();
        let cloud = with_cloud(&provider, BackendKind::S3);
        let events = record_events(&provider);
        let path = sp("projects/v1/song.od");

        provider.write(&path, b"v1".to_vec(), &WriteOptions::default()).await.unwrap();

        assert_eq!(fs.len(), 1);
        assert!(!cloud.exists(&path).await.unwrap());
        assert_eq!(provider.read(&path, &ReadOptions::default()).await.unwrap(), b"v1");
        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeEvent::new(ChangeKind::Written, path)]
        );
        assert_eq!(provider.pending_syncs(), 0);
    }

    #[tokio::test]
    async fn test_read_falls_back_to_cloud_and_caches() {
        let (fs, provider) = manual_provider();
        let cloud = with_cloud(&provider, BackendKind::Dropbox);
        let path = sp("samples/v2/kick.wav");
        cloud.write(&path, b"kick".to_vec(), &BackendWriteOptions::default()).await.unwrap();

        assert_eq!(provider.read(&path, &ReadOptions::default()).await.unwrap(), b"kick");
        assert_eq!(fs.len(), 1);
        assert!(provider.exists(&path, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_prefers_cloud_when_asked() {
        let (_, provider) = manual_provider();
        let cloud = with_cloud(&provider, BackendKind::S3);
        let path = sp("projects/v1/a.od");

        provider
            .write(&path, b"local".to_vec(), &WriteOptions::default())
            .await
            .unwrap();
        cloud.write(&path, b"cloud".to_vec(), &BackendWriteOptions::default()).await.unwrap();

        let preferred = provider
            .read(&path, &ReadOptions { prefer_cloud: true })
            .await
            .unwrap();
        assert_eq!(preferred, b"cloud");
        assert_eq!(provider.read(&path, &ReadOptions::default()).await.unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_double_failure_surfaces_local_error() {
        let (_, provider) = manual_provider();
        let (_, cloud) = memory(BackendKind::S3);
        let faulty = FaultyBackend {
            fail_reads: true,
            ..FaultyBackend::wrap(cloud)
        };
        provider.add_cloud_backend(BackendConfig::new(Arc::new(faulty), [StorageScope::All], 0));

        let err = provider
            .read(&sp("projects/v1/missing.od"), &ReadOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "expected the local error, got {}", err);

        let err = provider
            .read(&sp("projects/v1/missing.od"), &ReadOptions { prefer_cloud: true })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_swallows_cloud_failure() {
        let (fs, provider) = manual_provider();
        let (_, cloud) = memory(BackendKind::GoogleDrive);
        let faulty = FaultyBackend {
            fail_deletes: true,
            ..FaultyBackend::wrap(cloud)
        };
        provider.add_cloud_backend(BackendConfig::new(Arc::new(faulty), [StorageScope::All], 0));
        let events = record_events(&provider);
        let path = sp("soundfont/piano.sf2");

        provider.write(&path, vec![1], &WriteOptions::default()).await.unwrap();
        provider.delete(&path, &DeleteOptions::default()).await.unwrap();
        provider.delete(&path, &DeleteOptions::default()).await.unwrap();

        assert!(fs.is_empty());
        assert_eq!(events.lock().unwrap().last().unwrap().kind, ChangeKind::Deleted);
    }

    #[tokio::test]
    async fn test_delete_mirrors_to_cloud() {
        let (_, provider) = manual_provider();
        let cloud = with_cloud(&provider, BackendKind::S3);
        let path = sp("projects/v1/old.od");
        cloud.write(&path, vec![1], &BackendWriteOptions::default()).await.unwrap();
        provider.write(&path, vec![1], &WriteOptions::default()).await.unwrap();

        provider
            .delete(&path, &DeleteOptions { recursive: false, skip_cloud: true })
            .await
            .unwrap();
        assert!(cloud.exists(&path).await.unwrap());

        provider.delete(&path, &DeleteOptions::default()).await.unwrap();
        assert!(!cloud.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_without_backend_fails_softly() {
        let (_, provider) = manual_provider();
        let result = provider.sync(StorageScope::Projects, SyncOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, "projects/v1");
    }

    #[tokio::test]
    async fn test_upload_partial_failure() {
        let (_, provider) = manual_provider();
        let (_, cloud) = memory(BackendKind::S3);
        let failing = sp("projects/v1/b/broken.od");
        let faulty = Arc::new(FaultyBackend {
            fail_write: Some(failing.clone()),
            ..FaultyBackend::wrap(cloud.clone())
        });
        provider.add_cloud_backend(BackendConfig::new(faulty, [StorageScope::Projects], 1));

        for name in ["projects/v1/a.od", "projects/v1/b/broken.od", "projects/v1/b/c/deep.od"] {
            provider.write(&sp(name), vec![7], &WriteOptions::default()).await.unwrap();
        }
        provider.write(&sp("samples/v2/x.wav"), vec![7], &WriteOptions::default()).await.unwrap();

        let result = provider.sync(StorageScope::Projects, SyncOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.files_uploaded, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, failing.to_key());
        assert!(cloud.exists(&sp("projects/v1/b/c/deep.od")).await.unwrap());
        assert!(!cloud.exists(&sp("samples/v2/x.wav")).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_rejected() {
        let (_, provider) = manual_provider();
        let (_, cloud) = memory(BackendKind::S3);
        let slow = FaultyBackend {
            write_delay: Some(Duration::from_millis(20)),
            ..FaultyBackend::wrap(cloud)
        };
        provider.add_cloud_backend(BackendConfig::new(Arc::new(slow), [StorageScope::All], 0));
        provider.write(&sp("projects/v1/a.od"), vec![1], &WriteOptions::default()).await.unwrap();

        let (first, second) = tokio::join!(
            provider.sync(StorageScope::All, SyncOptions::default()),
            provider.sync(StorageScope::All, SyncOptions::default()),
        );

        assert!(first.success);
        assert_eq!(first.files_uploaded, 1);
        assert!(!second.success);
        assert_eq!(second.errors.len(), 1);
        assert!(second.errors[0].error.contains("already"));
        assert!(!provider.is_syncing());

        let again = provider.sync(StorageScope::All, SyncOptions::default()).await;
        assert!(again.success);
    }

    #[tokio::test]
    async fn test_download_keeps_newer_local_copies() {
        let (local_fs, provider) = manual_provider();
        let cloud = with_cloud(&provider, BackendKind::Dropbox);
        let newer = sp("projects/v1/newer.od");
        let older = sp("projects/v1/older.od");
        let fresh = sp("projects/v1/sub/fresh.od");

        for path in [&newer, &older, &fresh] {
            cloud.write(path, b"cloud".to_vec(), &BackendWriteOptions::default()).await.unwrap();
        }
        for path in [&newer, &older] {
            provider.write(path, b"local".to_vec(), &WriteOptions::default()).await.unwrap();
        }
        local_fs.set_modified(&newer, Utc::now() + ChronoDuration::hours(1)).unwrap();
        local_fs.set_modified(&older, Utc::now() - ChronoDuration::hours(1)).unwrap();

        let result = provider
            .sync(StorageScope::Projects, SyncOptions::new(SyncDirection::Download))
            .await;

        assert!(result.success);
        assert_eq!(result.files_downloaded, 2);
        let read = |path: StoragePath| {
            let provider = provider.clone();
            async move { provider.read(&path, &ReadOptions::default()).await.unwrap() }
        };
        assert_eq!(read(newer).await, b"local");
        assert_eq!(read(older).await, b"cloud");
        assert_eq!(read(fresh).await, b"cloud");
    }

    #[tokio::test]
    async fn test_sync_both_and_progress() {
        let (_, provider) = manual_provider();
        let cloud = with_cloud(&provider, BackendKind::S3);
        provider.write(&sp("samples/v2/up.wav"), vec![1], &WriteOptions::default()).await.unwrap();
        cloud.write(&sp("samples/v2/down.wav"), vec![2], &BackendWriteOptions::default()).await.unwrap();

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        let options = SyncOptions::new(SyncDirection::Both)
            .with_progress(move |p| sink.lock().unwrap().push(p.clone()));
        let events = record_events(&provider);

        let result = provider.sync(StorageScope::Samples, options).await;

        assert!(result.success);
        assert_eq!(result.files_uploaded, 1);
        // The cloud now holds both files; up.wav is unchanged locally.
        assert_eq!(result.files_downloaded, 2);
        assert!(provider.exists(&sp("samples/v2/down.wav"), false).await.unwrap());

        let progress = progress.lock().unwrap();
        assert!(progress.iter().all(|p| p.bytes_transferred == 0 && p.bytes_total == 0));
        assert_eq!(progress.first().unwrap().total, 1);
        assert_eq!(progress.last().unwrap().completed, progress.last().unwrap().total);
        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeEvent::new(ChangeKind::Synced, sp("samples/v2"))]
        );
    }

    #[tokio::test]
    async fn test_priority_selection() {
        let (_, provider) = manual_provider();
        let (_, low) = memory(BackendKind::Dropbox);
        let (_, high) = memory(BackendKind::S3);
        provider.add_cloud_backend(BackendConfig::new(low, [StorageScope::Projects], 1));
        provider.add_cloud_backend(BackendConfig::new(high, [StorageScope::Projects], 5));

        let path = sp("projects/v1/song.od");
        for _ in 0..5 {
            assert_eq!(provider.get_backend_for_path(&path, true).kind(), BackendKind::S3);
        }
        assert_eq!(provider.get_backend_for_path(&path, false).kind(), BackendKind::Local);
        assert_eq!(
            provider.get_backend_for_path(&sp("samples/v2/x"), true).kind(),
            BackendKind::Local
        );
    }

    #[tokio::test]
    async fn test_same_kind_replaces_registration() {
        let (_, provider) = manual_provider();
        let (_, first) = memory(BackendKind::S3);
        let (_, second) = memory(BackendKind::S3);
        provider.add_cloud_backend(BackendConfig::new(first, [StorageScope::All], 9));
        provider.add_cloud_backend(BackendConfig::new(second, [StorageScope::Samples], 1));

        let backends = provider.backends();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].priority, 1);

        assert!(provider.remove_cloud_backend(BackendKind::S3));
        assert!(!provider.remove_cloud_backend(BackendKind::S3));
        assert!(provider.backends().is_empty());
    }

    #[tokio::test]
    async fn test_copy_and_rename_mirror_cloud() {
        let (_, provider) = manual_provider();
        let cloud = with_cloud(&provider, BackendKind::S3);
        let a = sp("projects/v1/a.od");
        let b = sp("projects/v1/b.od");
        let c = sp("projects/v1/c.od");
        provider.write(&a, b"song".to_vec(), &WriteOptions::default()).await.unwrap();
        cloud.write(&a, b"song".to_vec(), &BackendWriteOptions::default()).await.unwrap();

        provider.copy(&a, &b).await.unwrap();
        provider.rename(&b, &c).await.unwrap();

        assert!(provider.exists(&a, false).await.unwrap());
        assert!(!provider.exists(&b, false).await.unwrap());
        assert!(provider.exists(&c, false).await.unwrap());
        assert!(!cloud.exists(&b).await.unwrap());
        assert_eq!(cloud.read(&c).await.unwrap(), b"song");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_sync_is_debounced_per_scope() {
        let (_, local) = memory(BackendKind::Local);
        let provider = StorageProvider::new(
            local,
            ProviderOptions {
                auto_sync: true,
                sync_debounce: Duration::from_secs(5),
            },
        );
        let cloud = with_cloud(&provider, BackendKind::S3);
        let events = record_events(&provider);
        let synced = || {
            events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.kind == ChangeKind::Synced)
                .count()
        };

        for i in 0..3 {
            let path = sp(&format!("projects/v1/take{}.od", i));
            provider.write(&path, vec![i], &WriteOptions::default()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // Last write at t=2s; the sync is due at t=7s.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(synced(), 0);
        assert_eq!(provider.pending_syncs(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(synced(), 1);
        for i in 0..3 {
            assert!(cloud.exists(&sp(&format!("projects/v1/take{}.od", i))).await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_sync_retries_while_manual_sync_runs() {
        let (_, local) = memory(BackendKind::Local);
        let provider = StorageProvider::new(
            local,
            ProviderOptions {
                auto_sync: true,
                sync_debounce: Duration::from_secs(5),
            },
        );
        let (_, cloud) = memory(BackendKind::S3);
        let slow = FaultyBackend {
            write_delay: Some(Duration::from_secs(7)),
            ..FaultyBackend::wrap(cloud.clone())
        };
        provider.add_cloud_backend(BackendConfig::new(Arc::new(slow), [StorageScope::All], 0));

        let early = sp("projects/v1/a.od");
        let late = sp("projects/v1/b.od");
        let skip = WriteOptions {
            skip_sync: true,
            ..WriteOptions::default()
        };
        provider.write(&early, vec![1], &skip).await.unwrap();

        let manual = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.sync(StorageScope::All, SyncOptions::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(provider.is_syncing());

        // Due at t=5s, while the manual sync still runs until t=7s.
        provider.write(&late, vec![2], &WriteOptions::default()).await.unwrap();

        let manual = manual.await.unwrap();
        assert!(manual.success);
        assert!(!cloud.exists(&late).await.unwrap());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(cloud.exists(&late).await.unwrap());
        assert_eq!(provider.pending_syncs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_sync_and_disable_auto_sync() {
        let (_, local) = memory(BackendKind::Local);
        let provider = StorageProvider::new(local, ProviderOptions::default());
        with_cloud(&provider, BackendKind::S3);

        provider
            .write(
                &sp("projects/v1/a.od"),
                vec![1],
                &WriteOptions {
                    skip_sync: true,
                    ..WriteOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(provider.pending_syncs(), 0);

        provider.write(&sp("projects/v1/b.od"), vec![1], &WriteOptions::default()).await.unwrap();
        assert_eq!(provider.pending_syncs(), 1);
        provider.set_auto_sync(false);
        assert_eq!(provider.pending_syncs(), 0);
        assert!(!provider.auto_sync());
    }

    #[tokio::test]
    async fn test_health_and_quota_fan_out() {
        let (_, provider) = manual_provider();
        with_cloud(&provider, BackendKind::S3);
        with_cloud(&provider, BackendKind::Dropbox);

        let health = provider.health_check().await;
        assert_eq!(health.len(), 3);
        assert!(health.values().all(|status| status.healthy));

        let quotas = provider.storage_quotas().await;
        assert_eq!(quotas.len(), 3);
        assert!(quotas[&BackendKind::Local].is_none());
    }

    #[tokio::test]
    async fn test_listener_panic_does_not_fail_write() {
        let (_, provider) = manual_provider();
        provider.on_change(|_| panic!("listener bug"));
        let events = record_events(&provider);

        provider.write(&sp("projects/v1/a.od"), vec![1], &WriteOptions::default()).await.unwrap();
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_from_configuration() {
        let (_, local) = memory(BackendKind::Local);
        let config = StorageConfiguration::default()
            .set_auto_sync(false)
            .add_cloud_backend(CloudBackendConfig::new(
                CloudBackendSettings::S3(S3Settings {
                    endpoint: Some("http://127.0.0.1:9000".to_string()),
                    region: "us-east-1".to_string(),
                    bucket: "studio".to_string(),
                    access_key_id: "AKID".to_string(),
                    secret_access_key: "secret".to_string(),
                    path_style: true,
                    prefix: String::new(),
                    request_timeout_secs: None,
                }),
                [StorageScope::Projects, StorageScope::Samples],
                2,
            ));

        let provider = StorageProvider::from_configuration(local, &config);
        assert!(!provider.auto_sync());

        let backends = provider.backends();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].kind(), BackendKind::S3);
        assert_eq!(backends[0].priority, 2);
        assert!(backends[0].covers(StorageScope::Samples));
        assert!(!backends[0].covers(StorageScope::Soundfonts));
    }
}
