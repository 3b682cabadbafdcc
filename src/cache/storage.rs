//! Storage backends — the synchronous key/value layer under every cache.
//!
//! Three policies are provided:
//!
//! | Backend            | Bound     | Recency bookkeeping                         | Eviction sweep |
//! |--------------------|-----------|---------------------------------------------|----------------|
//! | [`MemoryStorage`]  | unbounded | none                                        | none           |
//! | [`MruArrayStorage`]| `max_size`| entry moved to the end of a `Vec` on access | `O(n)`         |
//! | [`MruMapStorage`]  | `max_size`| per-entry access stamp in a `HashMap`       | `O(n log n)`   |
//!
//! The bounded backends evict in batches: when an insert of a new key would
//! exceed `max_size`, the `max(max_size / drop_percentage, 1)` least recently
//! used entries are dropped first. The entry being inserted is never evicted.
//!
//! Every backend serializes access through one mutex. `get` on an MRU backend
//! updates recency and is therefore a write under the lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Capability contract for a cache's storage layer.
///
/// Implementations must be safe to call from many tasks at once; `reset`
/// must be atomic with respect to concurrent `get`/`set` calls.
pub trait Storage<K, V>: Send + Sync {
    /// Returns a clone of the stored value, updating recency where tracked.
    fn get(&self, key: &K) -> Option<V>;

    /// Stores `value` under `key`, evicting first if the backend is full.
    fn set(&self, key: K, value: V);

    /// Removes `key`. Returns the removed value, if any.
    fn remove(&self, key: &K) -> Option<V>;

    /// Drops every entry.
    fn reset(&self);

    /// Number of resident entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Recover the guard from a poisoned lock: every critical section below leaves
// the collection structurally valid even if it unwinds.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Computes how many entries a bounded backend drops per eviction sweep.
// Upper bound on what a bounded backend reserves up front; `max_size` may be
// huge to mean "effectively unbounded".
const MAX_PREALLOCATED: usize = 1024;

pub(crate) fn drop_count(max_size: usize, drop_percentage: usize) -> usize {
    (max_size / drop_percentage.max(1)).max(1)
}

// ── MemoryStorage ─────────────────────────────────────────────────────────────

/// Unbounded map-backed storage.
#[derive(Debug)]
pub struct MemoryStorage<K, V> {
    map: Mutex<HashMap<K, V>>,
}

impl<K, V> MemoryStorage<K, V> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for MemoryStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for MemoryStorage<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        lock(&self.map).get(key).cloned()
    }

    fn set(&self, key: K, value: V) {
        lock(&self.map).insert(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        lock(&self.map).remove(key)
    }

    fn reset(&self) {
        lock(&self.map).clear();
    }

    fn len(&self) -> usize {
        lock(&self.map).len()
    }
}

// ── MruArrayStorage ───────────────────────────────────────────────────────────

/// Bounded storage kept as a `Vec` ordered from least to most recently used.
///
/// A hit moves the entry to the end; eviction drains a prefix. Lookups are a
/// linear scan from the back, which is where hot keys live.
#[derive(Debug)]
pub struct MruArrayStorage<K, V> {
    entries: Mutex<Vec<(K, V)>>,
    max_size: usize,
    drop_count: usize,
}

impl<K, V> MruArrayStorage<K, V> {
    /// Creates a backend holding at most `max_size` entries (minimum 1).
    pub fn new(max_size: usize, drop_percentage: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            entries: Mutex::new(Vec::with_capacity(max_size.min(MAX_PREALLOCATED) / 2)),
            max_size,
            drop_count: drop_count(max_size, drop_percentage),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<K, V> Storage<K, V> for MruArrayStorage<K, V>
where
    K: Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut entries = lock(&self.entries);
        let index = entries.iter().rposition(|(k, _)| k == key)?;
        if index + 1 < entries.len() {
            let entry = entries.remove(index);
            entries.push(entry);
        }
        entries.last().map(|(_, v)| v.clone())
    }

    fn set(&self, key: K, value: V) {
        let mut entries = lock(&self.entries);
        if let Some(index) = entries.iter().rposition(|(k, _)| *k == key) {
            entries.remove(index);
        } else if entries.len() >= self.max_size {
            let excess = entries.len() + 1 - self.max_size;
            let evict = self.drop_count.max(excess).min(entries.len());
            entries.drain(..evict);
        }
        entries.push((key, value));
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut entries = lock(&self.entries);
        let index = entries.iter().rposition(|(k, _)| k == key)?;
        Some(entries.remove(index).1)
    }

    fn reset(&self) {
        lock(&self.entries).clear();
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

// ── MruMapStorage ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Stamped<V> {
    value: V,
    last_access: u64,
}

#[derive(Debug)]
struct MruMap<K, V> {
    map: HashMap<K, Stamped<V>>,
    // Logical clock; strictly increasing, so ties between accesses are impossible.
    clock: u64,
}

impl<K, V> MruMap<K, V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded storage kept as a `HashMap` with a last-access stamp per entry.
///
/// Hits are `O(1)`; an eviction sweep sorts resident entries by stamp and
/// drops the oldest batch.
#[derive(Debug)]
pub struct MruMapStorage<K, V> {
    inner: Mutex<MruMap<K, V>>,
    max_size: usize,
    drop_count: usize,
}

impl<K, V> MruMapStorage<K, V> {
    /// Creates a backend holding at most `max_size` entries (minimum 1).
    pub fn new(max_size: usize, drop_percentage: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            inner: Mutex::new(MruMap {
                map: HashMap::with_capacity(max_size.min(MAX_PREALLOCATED) / 2),
                clock: 0,
            }),
            max_size,
            drop_count: drop_count(max_size, drop_percentage),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<K, V> Storage<K, V> for MruMapStorage<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut inner = lock(&self.inner);
        let now = inner.tick();
        let entry = inner.map.get_mut(key)?;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    fn set(&self, key: K, value: V) {
        let mut inner = lock(&self.inner);
        let now = inner.tick();

        if !inner.map.contains_key(&key) && inner.map.len() >= self.max_size {
            let excess = inner.map.len() + 1 - self.max_size;
            let evict = self.drop_count.max(excess);

            let mut by_age: Vec<(u64, K)> = inner
                .map
                .iter()
                .map(|(k, e)| (e.last_access, k.clone()))
                .collect();
            by_age.sort_unstable_by_key(|(stamp, _)| *stamp);

            for (_, stale) in by_age.into_iter().take(evict) {
                inner.map.remove(&stale);
            }
        }

        inner.map.insert(
            key,
            Stamped {
                value,
                last_access: now,
            },
        );
    }

    fn remove(&self, key: &K) -> Option<V> {
        lock(&self.inner).map.remove(key).map(|e| e.value)
    }

    fn reset(&self) {
        lock(&self.inner).map.clear();
    }

    fn len(&self) -> usize {
        lock(&self.inner).map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded() -> Vec<(&'static str, Box<dyn Storage<u32, u32>>)> {
        vec![
            ("array", Box::new(MruArrayStorage::new(10, 5))),
            ("map", Box::new(MruMapStorage::new(10, 5))),
        ]
    }

    #[test]
    fn drop_count_has_floor_of_one() {
        assert_eq!(drop_count(100, 10), 10);
        assert_eq!(drop_count(5, 10), 1);
        assert_eq!(drop_count(10, 0), 10);
    }

    #[test]
    fn memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        storage.set("a", 1);
        storage.set("b", 2);
        assert_eq!(storage.get(&"a"), Some(1));
        assert_eq!(storage.remove(&"a"), Some(1));
        assert_eq!(storage.get(&"a"), None);
        assert_eq!(storage.len(), 1);
        storage.reset();
        assert!(storage.is_empty());
    }

    #[test]
    fn bounded_size_never_exceeds_max() {
        for (name, storage) in bounded() {
            for key in 0..100 {
                storage.set(key, key);
                assert!(storage.len() <= 10, "{name}: len {}", storage.len());
            }
        }
    }

    #[test]
    fn eviction_drops_a_batch() {
        for (name, storage) in bounded() {
            for key in 0..10 {
                storage.set(key, key);
            }
            // 10 / 5 = 2 oldest entries go before the eleventh is inserted.
            storage.set(10, 10);
            assert_eq!(storage.len(), 9, "{name}");
            assert_eq!(storage.get(&0), None, "{name}");
            assert_eq!(storage.get(&1), None, "{name}");
            assert_eq!(storage.get(&2), Some(2), "{name}");
            assert_eq!(storage.get(&10), Some(10), "{name}");
        }
    }

    #[test]
    fn recently_read_entry_survives_eviction() {
        for (name, storage) in bounded() {
            for key in 1..=10 {
                storage.set(key, key);
            }
            assert_eq!(storage.get(&1), Some(1));
            storage.set(11, 11);
            assert_eq!(storage.get(&1), Some(1), "{name}: key 1 was evicted");
            assert_eq!(storage.get(&2), None, "{name}");
            assert_eq!(storage.get(&3), None, "{name}");
        }
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        for (name, storage) in bounded() {
            for key in 0..10 {
                storage.set(key, key);
            }
            storage.set(5, 50);
            assert_eq!(storage.len(), 10, "{name}");
            assert_eq!(storage.get(&0), Some(0), "{name}");
            assert_eq!(storage.get(&5), Some(50), "{name}");
        }
    }

    #[test]
    fn huge_bound_behaves_as_unbounded() {
        let stores: Vec<Box<dyn Storage<u32, u32>>> = vec![
            Box::new(MruArrayStorage::new(usize::MAX, 10)),
            Box::new(MruMapStorage::new(usize::MAX, 10)),
        ];
        for storage in stores {
            for key in 0..2_000 {
                storage.set(key, key);
            }
            assert_eq!(storage.len(), 2_000);
            assert_eq!(storage.get(&0), Some(0));
        }
    }

    #[test]
    fn capacity_of_one_keeps_newest() {
        let storage = MruMapStorage::new(1, 10);
        storage.set("a", 1);
        storage.set("b", 2);
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(&"b"), Some(2));

        let storage = MruArrayStorage::new(0, 10);
        assert_eq!(storage.max_size(), 1);
        storage.set("a", 1);
        storage.set("b", 2);
        assert_eq!(storage.get(&"a"), None);
        assert_eq!(storage.get(&"b"), Some(2));
    }

    #[test]
    fn remove_and_reset_on_bounded_backends() {
        for (name, storage) in bounded() {
            storage.set(1, 1);
            storage.set(2, 2);
            assert_eq!(storage.remove(&1), Some(1), "{name}");
            assert_eq!(storage.remove(&1), None, "{name}");
            storage.reset();
            assert!(storage.is_empty(), "{name}");
        }
    }

    #[test]
    fn concurrent_writers_respect_bound() {
        use std::sync::Arc;

        let storage = Arc::new(MruMapStorage::new(16, 4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        storage.set(t * 1000 + i, i);
                        assert!(storage.len() <= 16);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(storage.len() <= 16);
    }
}
