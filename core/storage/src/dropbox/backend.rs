//! Dropbox storage backend implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use studiosync_common::{Error, Result, StoragePath};

use crate::backend::{
    BackendKind, Entry, HealthStatus, ListOptions, Metadata, StorageBackend, StorageQuota,
    WriteOptions,
};
use crate::http::build_client;
use crate::oauth::{AuthConfig, AuthManager, TokenManager, Tokens, DROPBOX_OAUTH};

use super::client::{DropboxClient, DropboxMetadata, DROPBOX_API_BASE, DROPBOX_CONTENT_BASE};

/// Dropbox backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropboxSettings {
    /// Folder inside the app folder that acts as the backend root.
    #[serde(default)]
    pub root_path: String,
    pub tokens: Tokens,
    pub auth: AuthConfig,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_content_base")]
    pub content_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl DropboxSettings {
    pub fn new(auth: AuthConfig, tokens: Tokens) -> Self {
        Self {
            root_path: String::new(),
            tokens,
            auth,
            api_base: default_api_base(),
            content_base: default_content_base(),
            request_timeout_secs: None,
        }
    }
}

fn default_api_base() -> String {
    DROPBOX_API_BASE.to_string()
}

fn default_content_base() -> String {
    DROPBOX_CONTENT_BASE.to_string()
}

/// Dropbox storage backend.
pub struct DropboxBackend {
    client: DropboxClient,
    token_manager: Arc<TokenManager>,
    root: StoragePath,
}

impl DropboxBackend {
    pub fn new(settings: DropboxSettings) -> Result<Self> {
        let auth_manager = AuthManager::new(DROPBOX_OAUTH, settings.auth.clone())?;
        let token_manager = Arc::new(TokenManager::new(auth_manager, settings.tokens.clone()));
        let http = build_client(settings.request_timeout_secs.map(Duration::from_secs))?;
        let client = DropboxClient::new(
            http,
            token_manager.clone(),
            settings.api_base.clone(),
            settings.content_base.clone(),
        );
        let root = StoragePath::parse(&settings.root_path)?;

        Ok(Self {
            client,
            token_manager,
            root,
        })
    }

    pub async fn tokens(&self) -> Tokens {
        self.token_manager.get_tokens().await
    }

    /// Map a backend path to a Dropbox path. The Dropbox root is `""`;
    /// everything else starts with a slash. Colons are not allowed in
    /// Dropbox names and are replaced with underscores.
    pub(crate) fn dropbox_path(&self, path: &StoragePath) -> String {
        let segments: Vec<String> = self
            .root
            .components()
            .iter()
            .chain(path.components())
            .map(|segment| segment.replace(':', "_"))
            .collect();

        if segments.is_empty() {
            String::new()
        } else {
            format!("/{}", segments.join("/"))
        }
    }

    fn to_entry(metadata: DropboxMetadata) -> Option<Entry> {
        match metadata {
            DropboxMetadata::File {
                name,
                size,
                server_modified,
                ..
            } => Some(Entry::file(name, Some(size), server_modified)),
            DropboxMetadata::Folder { name, .. } => Some(Entry::directory(name)),
            DropboxMetadata::Deleted { .. } => None,
        }
    }

    async fn clear_destination(&self, to: &str) -> Result<()> {
        match self.client.delete(to).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StorageBackend for DropboxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dropbox
    }

    /// Dropbox creates parent folders on upload.
    async fn write(&self, path: &StoragePath, data: Vec<u8>, _options: &WriteOptions) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot write to the root".to_string()));
        }
        self.client.upload(&self.dropbox_path(path), data).await?;
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>> {
        self.client.download(&self.dropbox_path(path)).await
    }

    async fn delete(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        let target = self.dropbox_path(path);

        if !recursive {
            match self.client.get_metadata(&target).await {
                Ok(DropboxMetadata::Folder { .. }) => {
                    if !self.client.list_folder(&target, Some(1)).await?.is_empty() {
                        return Err(Error::InvalidInput(format!("Directory not empty: {}", path)));
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        self.clear_destination(&target).await
    }

    async fn list(&self, path: &StoragePath, options: &ListOptions) -> Result<Vec<Entry>> {
        match self
            .client
            .list_folder(&self.dropbox_path(path), options.max_results)
            .await
        {
            Ok(entries) => Ok(entries.into_iter().filter_map(Self::to_entry).collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn metadata(&self, path: &StoragePath) -> Result<Option<Metadata>> {
        if path.is_root() && self.root.is_root() {
            // get_metadata rejects the Dropbox root itself.
            return Ok(Some(Metadata {
                size: 0,
                modified: None,
                created: None,
                content_type: None,
            }));
        }

        match self.client.get_metadata(&self.dropbox_path(path)).await {
            Ok(DropboxMetadata::File {
                size,
                server_modified,
                client_modified,
                ..
            }) => Ok(Some(Metadata {
                size,
                modified: server_modified,
                created: client_modified,
                content_type: None,
            })),
            Ok(DropboxMetadata::Folder { .. }) => Ok(Some(Metadata {
                size: 0,
                modified: None,
                created: None,
                content_type: None,
            })),
            Ok(DropboxMetadata::Deleted { .. }) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn copy(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        let to = self.dropbox_path(to);
        self.clear_destination(&to).await?;
        self.client.copy(&self.dropbox_path(from), &to).await
    }

    async fn rename(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        let to = self.dropbox_path(to);
        self.clear_destination(&to).await?;
        self.client.move_path(&self.dropbox_path(from), &to).await
    }

    async fn mkdir(&self, path: &StoragePath, _recursive: bool) -> Result<()> {
        if path.is_root() && self.root.is_root() {
            return Ok(());
        }
        self.client.create_folder(&self.dropbox_path(path)).await
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let outcome = self.client.current_account().await;
        HealthStatus::from_probe(started, &outcome)
    }

    async fn storage_quota(&self) -> Option<StorageQuota> {
        match self.client.space_usage().await {
            Ok(usage) => {
                let total = usage.allocation.allocated?;
                Some(StorageQuota {
                    total,
                    available: total.saturating_sub(usage.used),
                })
            }
            Err(e) => {
                tracing::warn!("Dropbox quota unavailable: {}", e);
                None
            }
        }
    }
}
