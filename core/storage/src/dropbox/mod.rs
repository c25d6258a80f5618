//! Dropbox storage backend.
//!
//! Dropbox addresses content by path, so no ID resolution is needed.
//! Metadata and listing go through the JSON RPC endpoints; content is moved
//! through the separate upload/download endpoints.

pub mod backend;
pub mod client;

pub use backend::{DropboxBackend, DropboxSettings};
pub use client::{DropboxClient, DropboxMetadata};
