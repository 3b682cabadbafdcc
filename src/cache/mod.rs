//! Coalescing async cache — at most one in-flight fetch per key.
//!
//! [`AsyncCache`] layers an in-flight registry over a [`Storage`] backend.
//! A call to [`AsyncCache::value`] resolves in one of three ways:
//!
//! 1. **Hit** — the value is already stored and is returned immediately.
//! 2. **Join** — a fetch for the key is running; the caller waits for it and
//!    receives the same result as every other caller attached to it.
//! 3. **Fetch** — the caller registers a new [`CacheEntry`], and the fetch runs
//!    on its own Tokio task. On completion the task stores the value, removes
//!    the registration, then wakes all waiters.
//!
//! Because the fetch runs on a spawned task, a caller that stops waiting
//! (its future is dropped) never cancels a fetch other callers depend on.
//! Only [`AsyncCache::cancel`] aborts in-flight work.
//!
//! Registration is always removed by the fetch task's own completion path,
//! including when the fetch panics or is aborted, so a failed key can always
//! be fetched again (subject to [`FailurePolicy`]).
//!
//! ## Locking
//!
//! The registry and the storage each have one mutex. The registry lock is
//! always taken first; storage never calls back into the registry.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::admission::AdmissionPermit;

pub mod config;
pub mod entry;
pub mod storage;
pub mod throttled;

pub use config::{CacheConfig, FailurePolicy, StorageKind};
pub use entry::{CacheEntry, EntryState};
pub use storage::{MemoryStorage, MruArrayStorage, MruMapStorage, Storage};
pub use throttled::ThrottledCache;

/// Consumer-facing cache contract shared by [`AsyncCache`] and [`ThrottledCache`].
///
/// `value` never fails: a fetch that produces nothing, panics, or is cancelled
/// is reported as `None` to every caller that joined it.
pub trait Cache<K, V>: Send + Sync {
    /// Non-blocking read of a stored value. Never triggers a fetch.
    fn current_value(&self, key: &K) -> Option<V>;

    /// Returns the stored value, joins an in-flight fetch, or starts `fetch`.
    fn value<F, Fut>(&self, key: K, fetch: F) -> impl Future<Output = Option<V>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<V>> + Send + 'static;

    /// Drops the stored value (and any remembered failure) for `key`.
    fn remove(&self, key: &K);

    /// Clears storage. In-flight fetches keep running.
    fn reset(&self);

    /// Aborts every in-flight fetch and fails its waiters.
    fn cancel(&self);
}

// Outcome of inspecting a key without starting any work.
pub(crate) enum Lookup<K, V> {
    Hit(V),
    Failed,
    InFlight(Arc<CacheEntry<K, V>>),
    Vacant,
}

// Outcome of `Shared::claim`: either answered on the spot or a fetch to wait on.
pub(crate) enum Claim<K, V> {
    Ready(Option<V>),
    Wait(Arc<CacheEntry<K, V>>),
}

struct Registry<K, V> {
    tasks: HashMap<K, Arc<CacheEntry<K, V>>>,
    failed: HashSet<K>,
}

pub(crate) struct Shared<K, V> {
    storage: Box<dyn Storage<K, V>>,
    registry: Mutex<Registry<K, V>>,
    policy: FailurePolicy,
}

impl<K, V> Shared<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn registry(&self) -> MutexGuard<'_, Registry<K, V>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inspect(&self, registry: &Registry<K, V>, key: &K) -> Lookup<K, V> {
        if let Some(value) = self.storage.get(key) {
            return Lookup::Hit(value);
        }
        if registry.failed.contains(key) {
            return Lookup::Failed;
        }
        match registry.tasks.get(key) {
            Some(entry) => Lookup::InFlight(Arc::clone(entry)),
            None => Lookup::Vacant,
        }
    }

    pub(crate) fn lookup(&self, key: &K) -> Lookup<K, V> {
        let registry = self.registry();
        self.inspect(&registry, key)
    }

    /// Answers from storage, joins an existing fetch, or spawns `fetch`.
    ///
    /// A `permit` travels with a newly spawned fetch and is released once its
    /// result is stored. If no fetch is spawned the permit is returned to its
    /// controller on the spot.
    pub(crate) fn claim<F, Fut>(
        self: &Arc<Self>,
        key: K,
        fetch: F,
        permit: Option<AdmissionPermit>,
    ) -> Claim<K, V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<V>> + Send + 'static,
    {
        let mut registry = self.registry();

        match self.inspect(&registry, &key) {
            Lookup::Hit(value) => {
                debug!(key = ?key, "cache hit");
                return Claim::Ready(Some(value));
            }
            Lookup::Failed => {
                debug!(key = ?key, "sticky failure");
                return Claim::Ready(None);
            }
            Lookup::InFlight(entry) => {
                debug!(key = ?key, "joining in-flight fetch");
                return Claim::Wait(entry);
            }
            Lookup::Vacant => {}
        }

        debug!(key = ?key, "starting fetch");
        let entry = Arc::new(CacheEntry::new(key.clone()));
        registry.tasks.insert(key, Arc::clone(&entry));

        let mut guard = FetchGuard {
            shared: Arc::clone(self),
            entry: Arc::clone(&entry),
            settled: false,
            _permit: permit,
        };
        let task = tokio::spawn(async move {
            let value = fetch().await;
            guard.settle(value);
        });
        entry.attach(task.abort_handle());

        Claim::Wait(entry)
    }

    // Completion path of every fetch, successful or not.
    fn complete(&self, entry: &Arc<CacheEntry<K, V>>, value: Option<V>) {
        let key = entry.key();
        let mut registry = self.registry();

        let registered = registry
            .tasks
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry));

        if registered {
            match &value {
                Some(value) => self.storage.set(key.clone(), value.clone()),
                None if self.policy == FailurePolicy::Sticky => {
                    registry.failed.insert(key.clone());
                }
                None => {}
            }
            registry.tasks.remove(key);
        }
        drop(registry);

        debug!(key = ?key, loaded = value.is_some(), "fetch finished");
        entry.resolve(value);
    }

    fn remove(&self, key: &K) {
        let mut registry = self.registry();
        registry.failed.remove(key);
        self.storage.remove(key);
    }

    fn reset(&self) {
        let mut registry = self.registry();
        registry.failed.clear();
        self.storage.reset();
        info!(in_flight = registry.tasks.len(), "cache reset");
    }

    fn cancel(&self) {
        let entries: Vec<_> = {
            let mut registry = self.registry();
            registry.tasks.drain().map(|(_, entry)| entry).collect()
        };
        info!(count = entries.len(), "cancelling in-flight fetches");
        for entry in entries {
            entry.cancel();
        }
    }

    fn in_flight(&self) -> usize {
        self.registry().tasks.len()
    }
}

// Owned by the fetch task. Settles the entry exactly once; if the task is
// aborted or the fetch panics, `Drop` settles it as a failure instead.
struct FetchGuard<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<K, V>>,
    entry: Arc<CacheEntry<K, V>>,
    settled: bool,
    // Released after the result is stored (field drops after `Drop::drop`).
    _permit: Option<AdmissionPermit>,
}

impl<K, V> FetchGuard<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn settle(&mut self, value: Option<V>) {
        self.settled = true;
        self.shared.complete(&self.entry, value);
    }
}

impl<K, V> Drop for FetchGuard<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.settled {
            warn!(key = ?self.entry.key(), "fetch ended without a result");
            self.shared.complete(&self.entry, None);
        }
    }
}

/// A coalescing cache over any [`Storage`] backend.
///
/// Cloning is cheap and yields a handle to the same cache.
///
/// # Examples
///
/// ```
/// use reqcache::cache::{AsyncCache, MruMapStorage};
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache = AsyncCache::new(MruMapStorage::new(100, 10));
///
/// let value = cache.value("answer", || async { Some(42) }).await;
/// assert_eq!(value, Some(42));
///
/// // Served from storage; the fetch is not called again.
/// assert_eq!(cache.current_value(&"answer"), Some(42));
/// # }
/// ```
pub struct AsyncCache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for AsyncCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> Debug for AsyncCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCache")
            .field("policy", &self.shared.policy)
            .finish_non_exhaustive()
    }
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache over `storage` with [`FailurePolicy::Retry`].
    pub fn new<S>(storage: S) -> Self
    where
        S: Storage<K, V> + 'static,
    {
        Self::with_storage(Box::new(storage), FailurePolicy::Retry)
    }

    /// Creates a cache over an already boxed backend.
    pub fn with_storage(storage: Box<dyn Storage<K, V>>, policy: FailurePolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                storage,
                registry: Mutex::new(Registry {
                    tasks: HashMap::new(),
                    failed: HashSet::new(),
                }),
                policy,
            }),
        }
    }

    /// Builds the storage and policy described by `config`.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_storage(config.build_storage(), config.failure_policy)
    }

    /// Creates a cache over `storage` with an explicit failure policy.
    pub fn with_policy<S>(storage: S, policy: FailurePolicy) -> Self
    where
        S: Storage<K, V> + 'static,
    {
        Self::with_storage(Box::new(storage), policy)
    }

    pub fn policy(&self) -> FailurePolicy {
        self.shared.policy
    }

    pub fn current_value(&self, key: &K) -> Option<V> {
        self.shared.storage.get(key)
    }

    /// Returns the value for `key`, fetching it at most once across all
    /// concurrent callers.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn value<F, Fut>(&self, key: K, fetch: F) -> Option<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<V>> + Send + 'static,
    {
        match self.shared.claim(key, fetch, None) {
            Claim::Ready(value) => value,
            Claim::Wait(entry) => entry.value().await,
        }
    }

    /// Like [`value`](Self::value), for fetches that report why they failed.
    ///
    /// The error is logged and every joined caller observes `None`.
    pub async fn try_value<F, Fut, E>(&self, key: K, fetch: F) -> Option<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.value(key, move || fallible(fetch)).await
    }

    pub fn remove(&self, key: &K) {
        self.shared.remove(key);
    }

    pub fn reset(&self) {
        self.shared.reset();
    }

    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.shared.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.storage.is_empty()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<K, V>> {
        &self.shared
    }
}

impl<K, V> Cache<K, V> for AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn current_value(&self, key: &K) -> Option<V> {
        AsyncCache::current_value(self, key)
    }

    fn value<F, Fut>(&self, key: K, fetch: F) -> impl Future<Output = Option<V>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<V>> + Send + 'static,
    {
        AsyncCache::value(self, key, fetch)
    }

    fn remove(&self, key: &K) {
        AsyncCache::remove(self, key);
    }

    fn reset(&self) {
        AsyncCache::reset(self);
    }

    fn cancel(&self) {
        AsyncCache::cancel(self);
    }
}

pub(crate) async fn fallible<F, Fut, V, E>(fetch: F) -> Option<V>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
    E: Display,
{
    match fetch().await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "fetch failed");
            None
        }
    }
}
