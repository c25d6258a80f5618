//! Google Drive storage backend implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use studiosync_common::{Error, Result, StoragePath};

use crate::backend::{
    BackendKind, Entry, HealthStatus, ListOptions, Metadata, StorageBackend, StorageQuota,
    WriteOptions,
};
use crate::http::build_client;
use crate::oauth::{AuthConfig, AuthManager, TokenManager, Tokens, GOOGLE_DRIVE_OAUTH};

use super::client::{DriveClient, DriveFile, APP_DATA_FOLDER, DRIVE_API_BASE, DRIVE_UPLOAD_BASE};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Google Drive backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleDriveSettings {
    /// Root folder ID; defaults to the app-private folder.
    #[serde(default = "default_root_folder")]
    pub root_folder_id: String,
    pub tokens: Tokens,
    pub auth: AuthConfig,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_upload_base")]
    pub upload_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl GoogleDriveSettings {
    /// Settings for the app-private folder on the public API.
    pub fn new(auth: AuthConfig, tokens: Tokens) -> Self {
        Self {
            root_folder_id: default_root_folder(),
            tokens,
            auth,
            api_base: default_api_base(),
            upload_base: default_upload_base(),
            request_timeout_secs: None,
        }
    }
}

fn default_root_folder() -> String {
    APP_DATA_FOLDER.to_string()
}

fn default_api_base() -> String {
    DRIVE_API_BASE.to_string()
}

fn default_upload_base() -> String {
    DRIVE_UPLOAD_BASE.to_string()
}

/// Google Drive storage backend.
///
/// Paths are resolved to file IDs by walking "find child by name" queries
/// from the root folder. Folder IDs are cached by full path.
pub struct GoogleDriveBackend {
    client: DriveClient,
    token_manager: Arc<TokenManager>,
    root_id: String,
    /// Folder path to folder ID. Held while resolving or creating a chain,
    /// so concurrent writers queue instead of creating duplicate folders.
    folder_cache: Mutex<HashMap<String, String>>,
}

impl GoogleDriveBackend {
    /// # Errors
    /// - Invalid OAuth configuration
    pub fn new(settings: GoogleDriveSettings) -> Result<Self> {
        let auth_manager = AuthManager::new(GOOGLE_DRIVE_OAUTH, settings.auth.clone())?;
        let token_manager = Arc::new(TokenManager::new(auth_manager, settings.tokens.clone()));
        let http = build_client(settings.request_timeout_secs.map(Duration::from_secs))?;

        let space = (settings.root_folder_id == APP_DATA_FOLDER).then(|| APP_DATA_FOLDER.to_string());
        let client = DriveClient::new(
            http,
            token_manager.clone(),
            settings.api_base.clone(),
            settings.upload_base.clone(),
            space,
        );

        Ok(Self {
            client,
            token_manager,
            root_id: settings.root_folder_id,
            folder_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Current tokens, for persisting after a refresh.
    pub async fn tokens(&self) -> Tokens {
        self.token_manager.get_tokens().await
    }

    /// Resolve a folder path to its ID, creating missing folders when
    /// `create` is set. Returns `None` for a missing chain otherwise.
    async fn ensure_folder_path(&self, path: &StoragePath, create: bool) -> Result<Option<String>> {
        let mut cache = self.folder_cache.lock().await;

        let mut current_id = self.root_id.clone();
        let mut current_path = StoragePath::root();

        for component in path.components() {
            current_path = current_path.join(component)?;
            let key = current_path.to_key();

            if let Some(id) = cache.get(&key) {
                current_id = id.clone();
                continue;
            }

            let folder = match self.client.find_child(component, &current_id).await? {
                Some(found) if found.is_folder() => found,
                Some(_) if create => {
                    return Err(Error::InvalidInput(format!(
                        "Path component is a file: {}",
                        current_path
                    )))
                }
                Some(_) => return Ok(None),
                None if create => self.client.create_folder(component, &current_id).await?,
                None => return Ok(None),
            };

            current_id = folder.id;
            cache.insert(key, current_id.clone());
        }

        Ok(Some(current_id))
    }

    /// Look up the Drive file at `path`.
    async fn resolve(&self, path: &StoragePath) -> Result<Option<DriveFile>> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Ok(None);
        };

        match self.ensure_folder_path(&parent, false).await? {
            Some(parent_id) => self.client.find_child(name, &parent_id).await,
            None => Ok(None),
        }
    }

    /// Resolve the destination of a copy/move, replacing any existing object.
    async fn prepare_destination(&self, to: &StoragePath) -> Result<(String, String)> {
        let (parent, name) = split(to)?;
        let parent_id = self
            .ensure_folder_path(&parent, true)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Parent folder missing: {}", parent)))?;

        if let Some(existing) = self.client.find_child(&name, &parent_id).await? {
            self.client.delete(&existing.id).await?;
        }
        Ok((parent_id, name))
    }

    async fn invalidate(&self, path: &StoragePath) {
        let key = path.to_key();
        let prefix = format!("{}/", key);
        self.folder_cache
            .lock()
            .await
            .retain(|k, _| k != &key && !k.starts_with(&prefix));
    }

    pub(crate) fn to_entry(file: DriveFile) -> Entry {
        if file.is_folder() {
            Entry::directory(file.name)
        } else {
            let size = file.size_bytes();
            Entry::file(file.name, size, file.modified_time)
        }
    }

    fn to_metadata(file: &DriveFile) -> Metadata {
        Metadata {
            size: file.size_bytes().unwrap_or(0),
            modified: file.modified_time,
            created: file.created_time,
            content_type: (!file.is_folder()).then(|| file.mime_type.clone()),
        }
    }
}

fn split(path: &StoragePath) -> Result<(StoragePath, String)> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name.to_string())),
        _ => Err(Error::InvalidInput("Operation requires a non-root path".to_string())),
    }
}

#[async_trait]
impl StorageBackend for GoogleDriveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GoogleDrive
    }

    async fn write(&self, path: &StoragePath, data: Vec<u8>, options: &WriteOptions) -> Result<()> {
        let (parent, name) = split(path)?;
        let content_type = options.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);

        let parent_id = self
            .ensure_folder_path(&parent, true)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Parent folder missing: {}", parent)))?;

        match self.client.find_child(&name, &parent_id).await? {
            Some(existing) if existing.is_folder() => {
                return Err(Error::InvalidInput(format!("Path is a folder: {}", path)))
            }
            Some(existing) => {
                debug!(%path, file_id = %existing.id, "Updating Drive file");
                self.client.update_content(&existing.id, data, content_type).await?;
            }
            None => {
                debug!(%path, "Creating Drive file");
                self.client.create_file(&name, &parent_id, data, content_type).await?;
            }
        }
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>> {
        match self.resolve(path).await? {
            Some(file) if !file.is_folder() => self.client.download(&file.id).await,
            Some(_) => Err(Error::InvalidInput(format!("Cannot read folder: {}", path))),
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn delete(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        let Some(file) = self.resolve(path).await? else {
            return Ok(());
        };

        if file.is_folder() && !recursive {
            let children = self.client.list_folder(&file.id, Some(1)).await?;
            if !children.is_empty() {
                return Err(Error::InvalidInput(format!("Directory not empty: {}", path)));
            }
        }

        match self.client.delete(&file.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.invalidate(path).await;
        Ok(())
    }

    async fn list(&self, path: &StoragePath, options: &ListOptions) -> Result<Vec<Entry>> {
        let Some(folder_id) = self.ensure_folder_path(path, false).await? else {
            return Ok(Vec::new());
        };
        let files = self.client.list_folder(&folder_id, options.max_results).await?;
        Ok(files.into_iter().map(Self::to_entry).collect())
    }

    async fn metadata(&self, path: &StoragePath) -> Result<Option<Metadata>> {
        Ok(self.resolve(path).await?.as_ref().map(Self::to_metadata))
    }

    async fn copy(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        let source = self
            .resolve(from)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Source not found: {}", from)))?;
        let (parent_id, name) = self.prepare_destination(to).await?;
        self.client.copy_file(&source.id, &name, &parent_id).await?;
        Ok(())
    }

    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        let source = self
            .resolve(from)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Source not found: {}", from)))?;
        let (parent_id, name) = self.prepare_destination(to).await?;
        let current_parent = source.parents.first().cloned();

        self.client
            .move_file(&source.id, &name, &parent_id, current_parent.as_deref())
            .await?;
        self.invalidate(from).await;
        Ok(())
    }

    async fn mkdir(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        if !recursive {
            if let Some(parent) = path.parent() {
                if self.ensure_folder_path(&parent, false).await?.is_none() {
                    return Err(Error::NotFound(format!("Parent folder missing: {}", parent)));
                }
            }
        }
        self.ensure_folder_path(path, true).await?;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let outcome = self.client.about("user").await;
        HealthStatus::from_probe(started, &outcome)
    }

    async fn storage_quota(&self) -> Option<StorageQuota> {
        let about = match self.client.about("storageQuota").await {
            Ok(about) => about,
            Err(e) => {
                tracing::warn!("Google Drive quota unavailable: {}", e);
                return None;
            }
        };
        let quota = about.storage_quota?;
        let total: u64 = quota.limit.as_deref()?.parse().ok()?;
        let used: u64 = quota.usage.as_deref().and_then(|u| u.parse().ok()).unwrap_or(0);
        Some(StorageQuota {
            total,
            available: total.saturating_sub(used),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdrive::client::{child_query, FOLDER_MIME_TYPE};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(api: &str) -> GoogleDriveSettings {
        GoogleDriveSettings {
            root_folder_id: APP_DATA_FOLDER.to_string(),
            tokens: Tokens {
                access_token: "test_access".to_string(),
                refresh_token: "test_refresh".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            },
            auth: AuthConfig {
                client_id: "test_client".to_string(),
                client_secret: Some("test_secret".to_string()),
                redirect_url: "http://localhost:8080/callback".to_string(),
            },
            api_base: api.to_string(),
            upload_base: format!("{}/upload", api),
            request_timeout_secs: Some(5),
        }
    }

    fn sp(p: &str) -> StoragePath {
        StoragePath::parse(p).unwrap()
    }

    #[test]
    fn test_settings_defaults() {
        let settings: GoogleDriveSettings = serde_json::from_value(json!({
            "tokens": {
                "accessToken": "a",
                "refreshToken": "r",
                "expiresAt": "2030-01-01T00:00:00Z"
            },
            "auth": { "clientId": "id" }
        }))
        .unwrap();
        assert_eq!(settings.root_folder_id, APP_DATA_FOLDER);
        assert_eq!(settings.api_base, DRIVE_API_BASE);
        assert_eq!(settings.upload_base, DRIVE_UPLOAD_BASE);
    }

    #[test]
    fn test_to_entry() {
        let folder = DriveFile {
            id: "f".to_string(),
            name: "v1".to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: None,
            created_time: None,
            modified_time: None,
            parents: vec![],
            trashed: false,
        };
        assert!(GoogleDriveBackend::to_entry(folder).is_directory());
    }

    #[tokio::test]
    async fn test_read_resolves_path_and_downloads() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", child_query("samples", APP_DATA_FOLDER)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "dir1", "name": "samples", "mimeType": FOLDER_MIME_TYPE }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", child_query("kick.wav", "dir1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "file1", "name": "kick.wav", "mimeType": "audio/wav", "size": "4" }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/files/file1"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        assert_eq!(backend.read(&sp("samples/kick.wav")).await.unwrap(), vec![1, 2, 3, 4]);

        // Folder ID is served from the cache on the second lookup.
        let meta = backend.metadata(&sp("samples/kick.wav")).await.unwrap().unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(meta.content_type.as_deref(), Some("audio/wav"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        let missing = sp("projects/v1/none.od");

        assert!(backend.read(&missing).await.unwrap_err().is_not_found());
        assert!(!backend.exists(&missing).await.unwrap());
        assert!(backend.metadata(&missing).await.unwrap().is_none());
        assert!(backend
            .list(&sp("projects/v1"), &ListOptions::default())
            .await
            .unwrap()
            .is_empty());
        backend.delete(&missing, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_path_under_file_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "f1", "name": "song.od", "mimeType": "application/octet-stream" }]
            })))
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        let nested = sp("song.od/x");

        assert!(backend.read(&nested).await.unwrap_err().is_not_found());
        assert!(!backend.exists(&nested).await.unwrap());
        assert!(backend.metadata(&nested).await.unwrap().is_none());
        backend.delete(&nested, false).await.unwrap();

        let err = backend
            .write(&nested, b"x".to_vec(), &WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_concurrent_writes_create_folder_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "projects-id", "name": "projects", "mimeType": FOLDER_MIME_TYPE
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "new", "name": "song.od", "mimeType": "application/octet-stream"
            })))
            .expect(5)
            .mount(&server)
            .await;

        let backend = Arc::new(GoogleDriveBackend::new(settings(&server.uri())).unwrap());
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend
                        .write(
                            &sp(&format!("projects/song{}.od", i)),
                            vec![i as u8],
                            &WriteOptions::default(),
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_write_creates_missing_folder_chain() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "dir", "name": "folder", "mimeType": FOLDER_MIME_TYPE
            })))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "new", "name": "song.od", "mimeType": "application/octet-stream"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        backend
            .write(&sp("projects/v1/song.od"), b"project".to_vec(), &WriteOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_updates_existing_file_content() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", child_query("song.od", APP_DATA_FOLDER)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "f1", "name": "song.od", "mimeType": "application/octet-stream" }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/upload/files/f1"))
            .and(query_param("uploadType", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "f1", "name": "song.od", "mimeType": "application/octet-stream"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        backend
            .write(&sp("song.od"), b"v2".to_vec(), &WriteOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_follows_page_tokens() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "1", "name": "a", "mimeType": "audio/wav", "size": "1" }],
                "nextPageToken": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "2", "name": "b", "mimeType": FOLDER_MIME_TYPE }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        let entries = backend
            .list(&StoragePath::root(), &ListOptions::default())
            .await
            .unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(entries[1].is_directory());
    }

    #[tokio::test]
    async fn test_write_creates_file_with_multipart_upload() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/upload/files"))
            .and(query_param("uploadType", "multipart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "new", "name": "song.od", "mimeType": "application/octet-stream"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        backend
            .write(&sp("song.od"), b"project".to_vec(), &WriteOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_quota_from_about() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "storageQuota": { "limit": "1000", "usage": "300" }
            })))
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        assert_eq!(
            backend.storage_quota().await,
            Some(StorageQuota {
                total: 1000,
                available: 700
            })
        );
        assert!(backend.health_check().await.healthy);
    }

    #[tokio::test]
    async fn test_health_check_reports_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = GoogleDriveBackend::new(settings(&server.uri())).unwrap();
        let status = backend.health_check().await;
        assert!(!status.healthy);
        assert!(backend.storage_quota().await.is_none());
    }
}
