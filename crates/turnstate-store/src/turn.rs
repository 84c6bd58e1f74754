use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

use crate::batch::WriteBatch;
use crate::error::{StoreError, StoreResult};
use crate::key::StateKey;
use crate::traits::StateStore;

/// One logical operation's view of the store.
///
/// A turn buffers every write in memory. Reads consult the buffer first, so
/// a turn always sees its own writes. Nothing reaches the backend until
/// [`commit`](Self::commit) hands the buffered writes over as a single
/// [`WriteBatch`]; dropping the turn instead discards them, which is what
/// happens when an operation fails part-way or its future is cancelled.
///
/// Turns opened through a [`StateEntity`](crate::entity::StateEntity) also
/// hold the entity's turn lock until they are committed or dropped.
pub struct StateTurn {
    store: Arc<dyn StateStore>,
    /// `Some(bytes)` is a pending put, `None` a pending delete.
    pending: BTreeMap<StateKey, Option<Vec<u8>>>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl StateTurn {
    /// Open a turn directly on a backend, without entity serialization.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
            _guard: None,
        }
    }

    pub(crate) fn with_guard(store: Arc<dyn StateStore>, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
            _guard: Some(guard),
        }
    }

    /// `true` iff a value is currently stored under `key`.
    pub async fn exists(&self, key: &StateKey) -> StoreResult<bool> {
        match self.pending.get(key) {
            Some(pending) => Ok(pending.is_some()),
            None => self.store.contains(key).await,
        }
    }

    /// Read and decode the value under `key`, or `None` if absent.
    pub async fn try_read<T: DeserializeOwned>(&self, key: &StateKey) -> StoreResult<Option<T>> {
        match self.read_raw(key).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Return the existing value under `key`, or persist and return `default`.
    pub async fn read_or_initialize<T>(&mut self, key: &StateKey, default: T) -> StoreResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(existing) = self.try_read(key).await? {
            return Ok(existing);
        }
        self.set(key, &default)?;
        Ok(default)
    }

    /// Write `value`, or `merge(old, value)` if a value is already stored.
    pub async fn upsert<T, F>(&mut self, key: &StateKey, value: T, merge: F) -> StoreResult<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T, T) -> T,
    {
        let merged = match self.try_read::<T>(key).await? {
            Some(old) => merge(old, value),
            None => value,
        };
        self.set(key, &merged)
    }

    /// Unconditionally write `value` under `key`.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &StateKey, value: &T) -> StoreResult<()> {
        let bytes = encode(value)?;
        trace!(key = %key, len = bytes.len(), "turn write");
        self.pending.insert(key.clone(), Some(bytes));
        Ok(())
    }

    /// Remove the value under `key`; fails if nothing is stored there.
    pub async fn remove(&mut self, key: &StateKey) -> StoreResult<()> {
        if !self.exists(key).await? {
            return Err(StoreError::KeyNotFound(key.clone()));
        }
        trace!(key = %key, "turn remove");
        self.pending.insert(key.clone(), None);
        Ok(())
    }

    /// Remove the value under `key` if there is one.
    ///
    /// Returns `true` if a value was removed.
    pub async fn try_remove(&mut self, key: &StateKey) -> StoreResult<bool> {
        if !self.exists(key).await? {
            return Ok(false);
        }
        trace!(key = %key, "turn remove");
        self.pending.insert(key.clone(), None);
        Ok(true)
    }

    /// Number of keys this turn will write on commit.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Apply every buffered write atomically. Returns the number of keys
    /// written; a turn that wrote nothing never touches the backend.
    pub async fn commit(self) -> StoreResult<usize> {
        let writes = self.pending.len();
        if writes == 0 {
            return Ok(0);
        }
        let batch = self.to_batch();
        self.store.apply(batch).await?;
        debug!(writes, "turn committed");
        Ok(writes)
    }

    /// Drop every buffered write without applying it.
    pub fn discard(self) {
        if self.is_dirty() {
            debug!(writes = self.pending.len(), "turn discarded");
        }
    }

    fn to_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in &self.pending {
            match value {
                Some(bytes) => batch.put(key.clone(), bytes.clone()),
                None => batch.delete(key.clone()),
            }
        }
        batch
    }

    async fn read_raw(&self, key: &StateKey) -> StoreResult<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => {
                trace!(key = %key, "turn read");
                self.store.get(key).await
            }
        }
    }
}

impl std::fmt::Debug for StateTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTurn")
            .field("pending_writes", &self.pending.len())
            .field("serialized", &self._guard.is_some())
            .finish()
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(bincode::deserialize(bytes)?)
}
