use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::batch::{WriteBatch, WriteOp};
use crate::error::{StoreError, StoreResult};
use crate::key::StateKey;
use crate::traits::StateStore;

/// In-memory, BTreeMap-based state store.
///
/// Intended for tests and embedding. A batch is applied while holding the
/// write lock, so readers never see half of it. Every non-empty `apply`
/// bumps a commit counter that tests use to prove an operation wrote
/// nothing.
pub struct InMemoryStateStore {
    entries: RwLock<BTreeMap<StateKey, Vec<u8>>>,
    commits: AtomicU64,
}

impl InMemoryStateStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            commits: AtomicU64::new(0),
        }
    }

    /// Number of batches applied so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    /// Sorted list of every key currently holding a value.
    pub fn keys(&self) -> StoreResult<Vec<StateKey>> {
        let map = self.read_entries()?;
        Ok(map.keys().cloned().collect())
    }

    /// Keys belonging to the collection `name`.
    pub fn keys_for(&self, name: &str) -> StoreResult<Vec<StateKey>> {
        let map = self.read_entries()?;
        Ok(map.keys().filter(|k| k.name() == name).cloned().collect())
    }

    fn read_entries(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, BTreeMap<StateKey, Vec<u8>>>> {
        self.entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write_entries(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, BTreeMap<StateKey, Vec<u8>>>> {
        self.entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `batch` to an ordered map in place.
pub(crate) fn apply_to_map(map: &mut BTreeMap<StateKey, Vec<u8>>, batch: WriteBatch) {
    for op in batch {
        match op {
            WriteOp::Put { key, value } => {
                map.insert(key, value);
            }
            WriteOp::Delete { key } => {
                map.remove(&key);
            }
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &StateKey) -> StoreResult<Option<Vec<u8>>> {
        let map = self.read_entries()?;
        Ok(map.get(key).cloned())
    }

    async fn contains(&self, key: &StateKey) -> StoreResult<bool> {
        let map = self.read_entries()?;
        Ok(map.contains_key(key))
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut map = self.write_entries()?;
        apply_to_map(&mut map, batch);
        self.commits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.read_entries()?.len())
    }
}

impl std::fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.entries.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("InMemoryStateStore")
            .field("entry_count", &count)
            .field("commits", &self.commit_count())
            .finish()
    }
}
