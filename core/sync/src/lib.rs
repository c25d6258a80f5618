//! StudioSync provider
//!
//! The local-first storage facade and everything around it:
//! - Scope routing across cloud backends by priority
//! - Read-through caching, best-effort cloud deletes
//! - Debounced automatic upload per scope
//! - Explicit upload, download and bidirectional sync
//! - Change notifications

pub mod conflict;
pub(crate) mod debounce;
pub mod events;
pub mod provider;
pub mod result;
pub mod scope;

pub use conflict::{resolve_download, DownloadDecision};
pub use events::{ChangeEvent, ChangeKind, ListenerId};
pub use provider::{DeleteOptions, ProviderOptions, ReadOptions, StorageProvider, WriteOptions};
pub use result::{SyncDirection, SyncError, SyncOptions, SyncProgress, SyncResult};
pub use scope::{scope_from_path, select_backend, BackendConfig, SyncTarget};
pub use studiosync_common::StorageScope;
