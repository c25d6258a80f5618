//! Key-value persistence for the storage configuration.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use studiosync_common::{Error, Result};

use crate::configuration::StorageConfiguration;

/// Key the configuration is stored under.
pub const CONFIGURATION_KEY: &str = "studiosync:storage-configuration";

/// A small string-keyed store of string values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// A JSON object on disk, one member per key.
///
/// Every write rewrites the file through a temporary sibling and a rename.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<config dir>/studiosync/settings.json`
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("No configuration directory on this platform".to_string()))?;
        Ok(Self::new(dir.join("studiosync").join("settings.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self) -> Result<Map<String, Value>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Settings file is not a JSON object, starting empty");
                Ok(Map::new())
            }
        }
    }

    fn store(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard();
        Ok(self
            .load()?
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.guard();
        let mut map = self.load()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.store(&map)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.guard();
        let mut map = self.load()?;
        if map.remove(key).is_some() {
            self.store(&map)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values().remove(key);
        Ok(())
    }
}

/// Load the stored configuration.
///
/// A missing, unparseable or wrong-version entry yields
/// [`StorageConfiguration::default`]. Only store failures are errors.
pub fn load_configuration(store: &dyn KeyValueStore) -> Result<StorageConfiguration> {
    let Some(json) = store.get(CONFIGURATION_KEY)? else {
        debug!("No stored configuration, using defaults");
        return Ok(StorageConfiguration::default());
    };

    match StorageConfiguration::from_json(&json) {
        Ok(config) if config.is_current_version() => Ok(config),
        Ok(config) => {
            warn!(
                version = config.version,
                "Stored configuration has an unsupported version, using defaults"
            );
            Ok(StorageConfiguration::default())
        }
        Err(e) => {
            warn!("Stored configuration is unreadable, using defaults: {}", e);
            Ok(StorageConfiguration::default())
        }
    }
}

pub fn save_configuration(store: &dyn KeyValueStore, config: &StorageConfiguration) -> Result<()> {
    store.set(CONFIGURATION_KEY, &config.to_json()?)
}
