//! Options and outcome of a sync run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which way content moves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Local to cloud.
    #[default]
    Upload,
    /// Cloud to local, skipping files whose local copy is newer.
    Download,
    /// Upload, then download.
    Both,
}

/// Per-file progress. Byte counters are always zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total: usize,
    pub completed: usize,
    pub current_file: String,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
}

pub type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    pub on_progress: Option<ProgressCallback>,
}

impl SyncOptions {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            on_progress: None,
        }
    }

    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&SyncProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("direction", &self.direction)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// One failed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    pub path: String,
    pub error: String,
}

/// Outcome of one sync invocation. Failures are collected, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// True iff `errors` is empty.
    pub success: bool,
    pub files_uploaded: usize,
    pub files_downloaded: usize,
    pub files_deleted: usize,
    pub errors: Vec<SyncError>,
}

impl Default for SyncResult {
    fn default() -> Self {
        Self {
            success: true,
            files_uploaded: 0,
            files_downloaded: 0,
            files_deleted: 0,
            errors: Vec::new(),
        }
    }
}

impl SyncResult {
    /// A run that could not start.
    pub fn failed(path: impl Into<String>, error: impl fmt::Display) -> Self {
        let mut result = Self::default();
        result.record_error(path, error);
        result
    }

    pub fn record_error(&mut self, path: impl Into<String>, error: impl fmt::Display) {
        self.errors.push(SyncError {
            path: path.into(),
            error: error.to_string(),
        });
        self.success = false;
    }
}
