//! Storage backends for StudioSync.
//!
//! Every backend implements [`StorageBackend`], a uniform async contract
//! over backend-relative paths with normalized "not found" semantics:
//!
//! - [`LocalBackend`]: the always-present primary, over a
//!   [`LocalFileSystem`] collaborator (disk or memory)
//! - [`GoogleDriveBackend`]: ID-addressed, app-private folder
//! - [`DropboxBackend`]: path-addressed
//! - [`S3Backend`]: any S3-compatible object store
//!
//! Cloud backends are built from [`CloudBackendSettings`] through
//! [`create_backend`].

pub mod backend;
pub mod dropbox;
pub mod factory;
pub mod gdrive;
pub(crate) mod http;
pub mod local;
pub mod memory;
pub mod oauth;
pub mod s3;

pub use backend::{
    BackendKind, Entry, EntryKind, HealthStatus, ListOptions, Metadata, StorageBackend,
    StorageQuota, WriteOptions,
};
pub use dropbox::{DropboxBackend, DropboxSettings};
pub use factory::{create_backend, CloudBackendSettings};
pub use gdrive::{GoogleDriveBackend, GoogleDriveSettings};
pub use local::{DiskFileSystem, LocalBackend, LocalFileSystem};
pub use memory::MemoryFileSystem;
pub use oauth::{AuthConfig, AuthManager, TokenManager, Tokens, DROPBOX_OAUTH, GOOGLE_DRIVE_OAUTH};
pub use s3::{S3Backend, S3Settings};
