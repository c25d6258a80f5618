//! Google Drive storage backend.
//!
//! - OAuth2 bearer authentication with automatic token refresh
//! - App-private root folder (`appDataFolder`) by default
//! - Path-to-ID resolution with a per-instance folder cache
//! - Multipart create, single-part update, native copy and move

pub mod backend;
pub mod client;

pub use backend::{GoogleDriveBackend, GoogleDriveSettings};
pub use client::{DriveClient, DriveFile};
