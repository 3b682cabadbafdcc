//! One key's fetch lifecycle.

use std::sync::OnceLock;

use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Lifecycle of a single fetch.
///
/// Transitions only move forward: `Pending → Loaded` or `Pending → Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState<V> {
    Pending,
    Loaded(V),
    Failed,
}

impl<V> EntryState<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, EntryState::Pending)
    }

    /// Returns the loaded value, if any.
    pub fn value(&self) -> Option<&V> {
        match self {
            EntryState::Loaded(value) => Some(value),
            _ => None,
        }
    }
}

/// A fetch in progress for `key`, observable by any number of waiters.
///
/// The state lives in a [`watch`] channel so that a waiter can be dropped at
/// any point without affecting the fetch or the other waiters. The running
/// task's [`AbortHandle`] is attached once the fetch is spawned.
#[derive(Debug)]
pub struct CacheEntry<K, V> {
    key: K,
    state: watch::Sender<EntryState<V>>,
    task: OnceLock<AbortHandle>,
}

impl<K, V> CacheEntry<K, V>
where
    V: Clone + Send + Sync,
{
    pub(crate) fn new(key: K) -> Self {
        let (state, _) = watch::channel(EntryState::Pending);
        Self {
            key,
            state,
            task: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> EntryState<V> {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    /// Non-blocking read: the value if the fetch has already loaded, otherwise `None`.
    pub fn current_value(&self) -> Option<V> {
        self.state.borrow().value().cloned()
    }

    /// Waits for the fetch to settle and returns its value (`None` on failure).
    ///
    /// Dropping the returned future only detaches this waiter.
    pub async fn value(&self) -> Option<V> {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => state.value().cloned(),
            Err(_) => None,
        }
    }

    pub(crate) fn attach(&self, handle: AbortHandle) {
        let _ = self.task.set(handle);
    }

    /// Settles a pending entry. Returns `false` if it had already settled.
    pub(crate) fn resolve(&self, value: Option<V>) -> bool {
        self.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            *state = match value {
                Some(value) => EntryState::Loaded(value),
                None => EntryState::Failed,
            };
            true
        })
    }

    /// Aborts the running fetch and marks the entry failed.
    pub(crate) fn cancel(&self) -> bool {
        if let Some(handle) = self.task.get() {
            handle.abort();
        }
        self.resolve(None)
    }
}
