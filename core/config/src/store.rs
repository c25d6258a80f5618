//! Reactive configuration holder.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::warn;

use studiosync_common::Result;

use crate::configuration::StorageConfiguration;
use crate::persistence::{load_configuration, save_configuration, KeyValueStore};

/// Handle returned by [`ConfigurationStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&StorageConfiguration) + Send + Sync>;

/// Holds the current configuration and broadcasts every change.
///
/// `set` persists before it notifies. A new subscriber is called once
/// with the current value straight away.
pub struct ConfigurationStore {
    backing: Arc<dyn KeyValueStore>,
    current: RwLock<StorageConfiguration>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl ConfigurationStore {
    /// Load the stored configuration from `backing`.
    pub fn open(backing: Arc<dyn KeyValueStore>) -> Result<Self> {
        let current = load_configuration(backing.as_ref())?;
        Ok(Self {
            backing,
            current: RwLock::new(current),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn get(&self) -> StorageConfiguration {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persist `config`, make it current and notify subscribers.
    pub fn set(&self, config: StorageConfiguration) -> Result<()> {
        save_configuration(self.backing.as_ref(), &config)?;
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config.clone();
        self.notify(&config);
        Ok(())
    }

    /// Apply `f` to the current value and [`set`](Self::set) the result.
    pub fn update<F>(&self, f: F) -> Result<StorageConfiguration>
    where
        F: FnOnce(&StorageConfiguration) -> StorageConfiguration,
    {
        let next = f(&self.get());
        self.set(next.clone())?;
        Ok(next)
    }

    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&StorageConfiguration) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber: Subscriber = Arc::new(f);
        call_subscriber(&subscriber, &self.get());
        self.subscribers().push((id, subscriber));
        id
    }

    /// Returns whether the subscription was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Subscriber)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, config: &StorageConfiguration) {
        // Snapshot so subscribers may (un)subscribe from inside the callback.
        let snapshot: Vec<Subscriber> = self.subscribers().iter().map(|(_, s)| s.clone()).collect();
        for subscriber in snapshot {
            call_subscriber(&subscriber, config);
        }
    }
}

fn call_subscriber(subscriber: &Subscriber, config: &StorageConfiguration) {
    if catch_unwind(AssertUnwindSafe(|| subscriber(config))).is_err() {
        warn!("Configuration subscriber panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, CONFIGURATION_KEY};

    fn store() -> (Arc<MemoryStore>, ConfigurationStore) {
        let backing = Arc::new(MemoryStore::new());
        let store = ConfigurationStore::open(backing.clone()).unwrap();
        (backing, store)
    }

    #[test]
    fn test_subscribe_replays_current_value() {
        let (_, store) = store();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        store.subscribe(move |config| sink.lock().unwrap().push(config.sync_debounce_ms));
        assert_eq!(*seen.lock().unwrap(), vec![5000]);

        store.update(|c| c.set_sync_debounce(100)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![5000, 100]);
    }

    #[test]
    fn test_set_persists_before_notifying() {
        let (backing, store) = store();
        let persisted = Arc::new(Mutex::new(Vec::new()));

        let view = backing.clone();
        let sink = persisted.clone();
        store.subscribe(move |_| {
            let stored = view.get(CONFIGURATION_KEY).unwrap();
            sink.lock().unwrap().push(stored.is_some());
        });

        store.set(StorageConfiguration::default().set_auto_sync(false)).unwrap();
        assert_eq!(*persisted.lock().unwrap(), vec![false, true]);
        assert!(!store.get().auto_sync);

        let reopened = ConfigurationStore::open(backing).unwrap();
        assert!(!reopened.get().auto_sync);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let (_, store) = store();
        let calls = Arc::new(AtomicU64::new(0));

        let counter = calls.clone();
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));

        store.update(|c| c.set_auto_sync(false)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_contained() {
        let (_, store) = store();
        let calls = Arc::new(AtomicU64::new(0));

        store.subscribe(|config| {
            if !config.auto_sync {
                panic!("boom");
            }
        });
        let counter = calls.clone();
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update(|c| c.set_auto_sync(false)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
