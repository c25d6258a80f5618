//! Common utilities and types shared across the StudioSync crates.
//!
//! This module provides the error taxonomy used by every backend and the
//! normalized path type that all storage operations are addressed with.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{StoragePath, StorageScope};
