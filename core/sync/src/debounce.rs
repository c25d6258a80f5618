//! Per-scope trailing-edge debouncing of automatic syncs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use studiosync_common::StorageScope;

/// Holds at most one pending timer per scope. Scheduling again aborts the
/// pending timer and starts a new one, so only the last trigger in a burst
/// fires.
#[derive(Default)]
pub(crate) struct Debouncer {
    pending: Mutex<HashMap<StorageScope, JoinHandle<()>>>,
}

impl Debouncer {
    fn pending(&self) -> MutexGuard<'_, HashMap<StorageScope, JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `task` once `delay` has passed without another `schedule` call
    /// for the same scope.
    ///
    /// Only the wait is cancellable. Once the delay has elapsed the task is
    /// spawned on its own and runs to completion.
    pub(crate) fn schedule<F, Fut>(&self, scope: StorageScope, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(scope = %scope, "No async runtime, automatic sync skipped");
            return;
        };

        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(scope = %scope, "Debounce elapsed");
            tokio::spawn(task());
        });

        if let Some(previous) = self.pending().insert(scope, timer) {
            previous.abort();
        }
    }

    /// Number of timers that have not fired yet.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending().values().filter(|h| !h.is_finished()).count()
    }

    pub(crate) fn cancel_all(&self) {
        for (_, timer) in self.pending().drain() {
            timer.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
