//! Serde-friendly cache configuration.

use std::hash::Hash;

use serde::{Deserialize, Serialize};

use super::storage::{MemoryStorage, MruArrayStorage, MruMapStorage, Storage};

/// What a cache remembers about a fetch that produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Nothing: the next call for the key fetches again.
    #[default]
    Retry,
    /// The key answers `None` without fetching until it is removed or the
    /// cache is reset.
    Sticky,
}

/// Which [`Storage`] backend a configured cache is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Memory,
    MruArray,
    #[default]
    MruMap,
}

/// Cache settings, typically embedded in a host application's config file.
///
/// | Field               | Default   |
/// |---------------------|-----------|
/// | `max_size`          | `100`     |
/// | `drop_percentage`   | `10`      |
/// | `concurrency_limit` | `20`      |
/// | `failure_policy`    | `retry`   |
/// | `storage`           | `mru_map` |
///
/// # Examples
///
/// ```
/// use reqcache::cache::{CacheConfig, FailurePolicy, StorageKind};
///
/// let config: CacheConfig =
///     serde_json::from_str(r#"{"max_size": 8, "storage": "mru_array"}"#).unwrap();
/// assert_eq!(config.max_size, 8);
/// assert_eq!(config.storage, StorageKind::MruArray);
/// assert_eq!(config.failure_policy, FailurePolicy::Retry);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub drop_percentage: usize,
    /// Only consulted by [`ThrottledCache`](super::ThrottledCache).
    pub concurrency_limit: usize,
    pub failure_policy: FailurePolicy,
    pub storage: StorageKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            drop_percentage: 10,
            concurrency_limit: 20,
            failure_policy: FailurePolicy::Retry,
            storage: StorageKind::MruMap,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Builds the configured storage backend.
    pub fn build_storage<K, V>(&self) -> Box<dyn Storage<K, V>>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        match self.storage {
            StorageKind::Memory => Box::new(MemoryStorage::new()),
            StorageKind::MruArray => {
                Box::new(MruArrayStorage::new(self.max_size, self.drop_percentage))
            }
            StorageKind::MruMap => Box::new(MruMapStorage::new(self.max_size, self.drop_percentage)),
        }
    }
}
