//! Construction of cloud backends from persisted settings.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use studiosync_common::Result;

use crate::backend::{BackendKind, StorageBackend};
use crate::dropbox::{DropboxBackend, DropboxSettings};
use crate::gdrive::{GoogleDriveBackend, GoogleDriveSettings};
use crate::s3::{S3Backend, S3Settings};

/// Settings for one cloud backend, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CloudBackendSettings {
    GoogleDrive(GoogleDriveSettings),
    Dropbox(DropboxSettings),
    S3(S3Settings),
}

impl CloudBackendSettings {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::GoogleDrive(_) => BackendKind::GoogleDrive,
            Self::Dropbox(_) => BackendKind::Dropbox,
            Self::S3(_) => BackendKind::S3,
        }
    }

    /// One-line human readable location.
    pub fn describe(&self) -> String {
        match self {
            Self::GoogleDrive(s) => format!("gdrive://{}", s.root_folder_id),
            Self::Dropbox(s) => format!("dropbox://{}", s.root_path.trim_matches('/')),
            Self::S3(s) => format!("s3://{}/{}", s.bucket, s.prefix.trim_matches('/')),
        }
    }
}

/// Create the backend described by `settings`.
///
/// # Errors
/// - Invalid endpoint, OAuth or bucket configuration
pub fn create_backend(settings: &CloudBackendSettings) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match settings {
        CloudBackendSettings::GoogleDrive(s) => Arc::new(GoogleDriveBackend::new(s.clone())?),
        CloudBackendSettings::Dropbox(s) => Arc::new(DropboxBackend::new(s.clone())?),
        CloudBackendSettings::S3(s) => Arc::new(S3Backend::new(s.clone())?),
    };
    tracing::debug!(kind = %backend.kind(), "Created cloud backend");
    Ok(backend)
}
