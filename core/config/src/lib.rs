//! Persisted storage configuration for StudioSync.
//!
//! [`StorageConfiguration`] is an immutable value: every mutation returns a
//! new configuration. It is stored as JSON under a single key in a
//! [`KeyValueStore`], guarded by a schema version. [`ConfigurationStore`]
//! adds change notification on top for long-lived consumers.

pub mod configuration;
pub mod persistence;
pub mod store;

pub use configuration::{
    CloudBackendConfig, PrimaryBackend, StorageConfiguration, CURRENT_VERSION,
    DEFAULT_SYNC_DEBOUNCE_MS,
};
pub use persistence::{
    load_configuration, save_configuration, JsonFileStore, KeyValueStore, MemoryStore,
    CONFIGURATION_KEY,
};
pub use store::{ConfigurationStore, SubscriptionId};
