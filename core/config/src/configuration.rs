//! The persisted storage configuration value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use studiosync_common::{Error, Result, StorageScope};
use studiosync_storage::{BackendKind, CloudBackendSettings};

/// Configuration schema version. Anything else is discarded on load.
pub const CURRENT_VERSION: u32 = 1;

/// Default quiet period before an automatic sync.
pub const DEFAULT_SYNC_DEBOUNCE_MS: u64 = 5000;

/// The primary backend. Always the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryBackend {
    #[default]
    Local,
}

/// One attached cloud backend with its routing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudBackendConfig {
    #[serde(flatten)]
    pub settings: CloudBackendSettings,
    /// Scopes routed to this backend.
    pub scopes: BTreeSet<StorageScope>,
    /// Higher wins when several backends cover a scope.
    #[serde(default)]
    pub priority: i32,
}

impl CloudBackendConfig {
    pub fn new(
        settings: CloudBackendSettings,
        scopes: impl IntoIterator<Item = StorageScope>,
        priority: i32,
    ) -> Self {
        Self {
            settings,
            scopes: scopes.into_iter().collect(),
            priority,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.settings.kind()
    }
}

/// Which backends are attached and how syncing behaves.
///
/// All mutators take `&self` and return an updated copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfiguration {
    pub version: u32,
    pub primary: PrimaryBackend,
    /// At most one entry per backend kind.
    pub cloud_backends: Vec<CloudBackendConfig>,
    pub auto_sync: bool,
    pub sync_debounce_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamps: Option<BTreeMap<StorageScope, DateTime<Utc>>>,
}

impl Default for StorageConfiguration {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            primary: PrimaryBackend::Local,
            cloud_backends: Vec::new(),
            auto_sync: true,
            sync_debounce_ms: DEFAULT_SYNC_DEBOUNCE_MS,
            last_sync_timestamps: None,
        }
    }
}

impl StorageConfiguration {
    /// Attach a cloud backend, replacing any existing entry of the same kind.
    /// The new entry goes to the end of the list.
    pub fn add_cloud_backend(&self, config: CloudBackendConfig) -> Self {
        let mut next = self.remove_cloud_backend(config.kind());
        next.cloud_backends.push(config);
        next
    }

    pub fn remove_cloud_backend(&self, kind: BackendKind) -> Self {
        let mut next = self.clone();
        next.cloud_backends.retain(|c| c.kind() != kind);
        next
    }

    pub fn set_auto_sync(&self, enabled: bool) -> Self {
        Self {
            auto_sync: enabled,
            ..self.clone()
        }
    }

    pub fn set_sync_debounce(&self, debounce_ms: u64) -> Self {
        Self {
            sync_debounce_ms: debounce_ms,
            ..self.clone()
        }
    }

    /// Stamp the time of the last successful sync of `scope`.
    pub fn record_last_sync(&self, scope: StorageScope, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.last_sync_timestamps
            .get_or_insert_with(BTreeMap::new)
            .insert(scope, at);
        next
    }

    pub fn cloud_backend(&self, kind: BackendKind) -> Option<&CloudBackendConfig> {
        self.cloud_backends.iter().find(|c| c.kind() == kind)
    }

    pub fn last_sync(&self, scope: StorageScope) -> Option<DateTime<Utc>> {
        self.last_sync_timestamps
            .as_ref()
            .and_then(|stamps| stamps.get(&scope).copied())
    }

    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
