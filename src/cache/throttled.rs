//! Coalescing cache with bounded fetch concurrency.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use super::{AsyncCache, Cache, CacheConfig, Claim, Lookup, Storage, fallible};
use crate::admission::AdmissionController;

/// An [`AsyncCache`] whose brand-new fetches must first pass an
/// [`AdmissionController`].
///
/// Hits and joins never wait for admission. A caller that misses takes a
/// permit, then checks again: if another caller stored the value or started
/// the fetch while it was queued, the permit is handed straight back and the
/// caller joins that fetch instead. Otherwise the permit moves into the fetch
/// task and is released once the result is stored, whether the fetch
/// succeeds, fails, panics, or is cancelled.
///
/// # Examples
///
/// ```
/// use reqcache::cache::{MruArrayStorage, ThrottledCache};
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache = ThrottledCache::new(MruArrayStorage::new(50, 10), 4);
/// let thumb = cache.value(7u32, || async { Some(vec![0u8; 16]) }).await;
/// assert_eq!(thumb.map(|t| t.len()), Some(16));
/// # }
/// ```
pub struct ThrottledCache<K, V> {
    cache: AsyncCache<K, V>,
    admission: Arc<AdmissionController>,
}

impl<K, V> Clone for ThrottledCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            admission: Arc::clone(&self.admission),
        }
    }
}

impl<K, V> ThrottledCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache over `storage` allowing `limit` concurrent fetches.
    pub fn new<S>(storage: S, limit: usize) -> Self
    where
        S: Storage<K, V> + 'static,
    {
        Self::with_cache(AsyncCache::new(storage), limit)
    }

    /// Throttles an existing cache. Other handles to `cache` stay unthrottled.
    pub fn with_cache(cache: AsyncCache<K, V>, limit: usize) -> Self {
        Self {
            cache,
            admission: Arc::new(AdmissionController::new(limit)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_cache(AsyncCache::from_config(config), config.concurrency_limit)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn current_value(&self, key: &K) -> Option<V> {
        self.cache.current_value(key)
    }

    /// Returns the value for `key`, starting at most `limit` fetches at once.
    pub async fn value<F, Fut>(&self, key: K, fetch: F) -> Option<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<V>> + Send + 'static,
    {
        let shared = self.cache.shared();

        match shared.lookup(&key) {
            Lookup::Hit(value) => return Some(value),
            Lookup::Failed => return None,
            Lookup::InFlight(entry) => return entry.value().await,
            Lookup::Vacant => {}
        }

        let permit = self.admission.acquire().await;

        // The permit is dropped inside `claim` unless it starts the fetch.
        match shared.claim(key, fetch, Some(permit)) {
            Claim::Ready(value) => {
                debug!("resolved while queued for admission");
                value
            }
            Claim::Wait(entry) => entry.value().await,
        }
    }

    /// Like [`value`](Self::value), for fetches that report why they failed.
    pub async fn try_value<F, Fut, E>(&self, key: K, fetch: F) -> Option<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.value(key, move || fallible(fetch)).await
    }

    pub fn remove(&self, key: &K) {
        self.cache.remove(key);
    }

    pub fn reset(&self) {
        self.cache.reset();
    }

    pub fn cancel(&self) {
        self.cache.cancel();
    }

    pub fn in_flight(&self) -> usize {
        self.cache.in_flight()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<K, V> Cache<K, V> for ThrottledCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn current_value(&self, key: &K) -> Option<V> {
        ThrottledCache::current_value(self, key)
    }

    fn value<F, Fut>(&self, key: K, fetch: F) -> impl Future<Output = Option<V>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<V>> + Send + 'static,
    {
        ThrottledCache::value(self, key, fetch)
    }

    fn remove(&self, key: &K) {
        ThrottledCache::remove(self, key);
    }

    fn reset(&self) {
        ThrottledCache::reset(self);
    }

    fn cancel(&self) {
        ThrottledCache::cancel(self);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::cache::MemoryStorage;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distinct_keys_respect_limit() {
        let cache = ThrottledCache::new(MemoryStorage::new(), 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let callers: Vec<_> = (0..12u32)
            .map(|key| {
                let cache = cache.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    cache
                        .value(key, move || async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            Some(key * 10)
                        })
                        .await
                })
            })
            .collect();

        for (key, caller) in callers.into_iter().enumerate() {
            assert_eq!(caller.await.unwrap(), Some(key as u32 * 10));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(cache.admission().in_use(), 0);
        assert_eq!(cache.len(), 12);
    }

    #[tokio::test]
    async fn queued_caller_returns_permit_and_joins() {
        let cache = ThrottledCache::new(MemoryStorage::new(), 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        // Holds the only permit on key "a".
        let blocker = {
            let cache = cache.clone();
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                cache
                    .value("a", move || async move {
                        release.notified().await;
                        Some(1)
                    })
                    .await
            })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        // Two callers for "b" queue for admission behind it.
        let queued: Vec<_> = (0..2)
            .map(|_| {
                let cache = cache.clone();
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .value("b", move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Some(2)
                        })
                        .await
                })
            })
            .collect();
        tokio::task::yield_now().await;

        release.notify_one();
        assert_eq!(blocker.await.unwrap(), Some(1));
        for caller in queued {
            assert_eq!(caller.await.unwrap(), Some(2));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.admission().in_use(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_releases_permit() {
        let cache: ThrottledCache<u8, u8> = ThrottledCache::new(MemoryStorage::new(), 1);
        assert_eq!(
            cache.try_value(1, || async { Err::<u8, _>("offline") }).await,
            None
        );
        assert_eq!(cache.admission().in_use(), 0);
        assert_eq!(cache.value(1, || async { Some(5) }).await, Some(5));
    }

    #[tokio::test]
    async fn cancel_releases_permits() {
        let cache: ThrottledCache<u8, u8> = ThrottledCache::new(MemoryStorage::new(), 1);
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .value(1, || async {
                        std::future::pending::<()>().await;
                        Some(1)
                    })
                    .await
            })
        };
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.admission().in_use(), 1);

        cache.cancel();
        assert_eq!(waiter.await.unwrap(), None);

        // The aborted task drops its permit once the runtime reaps it.
        while cache.admission().in_use() != 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.value(1, || async { Some(9) }).await, Some(9));
    }

    #[tokio::test]
    async fn from_config_uses_concurrency_limit() {
        let config = CacheConfig::default().concurrency_limit(3);
        let cache: ThrottledCache<u8, u8> = ThrottledCache::from_config(&config);
        assert_eq!(cache.admission().limit(), 3);
    }
}
