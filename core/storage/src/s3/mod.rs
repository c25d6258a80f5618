//! S3-compatible object storage backend.
//!
//! Works against AWS S3 and compatible services (MinIO, R2, Wasabi) with
//! either virtual-hosted or path-style addressing. Requests are signed with
//! SigV4; listings use `ListObjectsV2` with a `/` delimiter.

pub mod backend;
pub mod signing;
pub mod xml;

pub use backend::{S3Backend, S3Settings};
pub use signing::Signer;
