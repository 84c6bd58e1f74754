use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::batch::WriteBatch;
use crate::error::{StoreError, StoreResult};
use crate::key::StateKey;
use crate::memory::apply_to_map;
use crate::traits::StateStore;
use crate::wal::{WalConfig, WriteAheadLog};

/// Durable state store backed by a turn log.
///
/// Every committed turn is appended to the log as one checksummed record
/// before it becomes visible in the in-memory index. Opening the store
/// replays the intact prefix of the log, so a crash in the middle of a
/// commit loses that whole turn and nothing else.
pub struct FileStateStore {
    wal: WriteAheadLog,
    entries: RwLock<BTreeMap<StateKey, Vec<u8>>>,
}

impl FileStateStore {
    /// Open the store at `path`, creating an empty log if none exists.
    pub fn open(path: impl AsRef<Path>, config: WalConfig) -> StoreResult<Self> {
        let wal = WriteAheadLog::open(path.as_ref(), config)?;
        let recovery = wal.recover()?;

        if recovery.discarded > 0 {
            warn!(
                path = %wal.path().display(),
                valid_len = recovery.valid_len,
                discarded = recovery.discarded,
                "dropping damaged turn log tail"
            );
            wal.truncate_to(recovery.valid_len)?;
        }

        let mut entries = BTreeMap::new();
        let replayed = recovery.batches.len();
        for batch in recovery.batches {
            apply_to_map(&mut entries, batch);
        }

        info!(path = %wal.path().display(), turns = replayed, keys = entries.len(), "state store opened");
        Ok(Self {
            wal,
            entries: RwLock::new(entries),
        })
    }

    /// Rewrite the log as a single snapshot of the current keyspace.
    pub fn compact(&self) -> StoreResult<()> {
        // Hold the write lock so no turn lands between snapshot and rewrite.
        let map = self
            .entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        let mut snapshot = WriteBatch::new();
        for (key, value) in map.iter() {
            snapshot.put(key.clone(), value.clone());
        }
        self.wal.rewrite(&snapshot)?;
        debug!(keys = map.len(), "state store compacted");
        Ok(())
    }

    /// Size of the log file in bytes.
    pub fn log_size(&self) -> StoreResult<u64> {
        self.wal.offset()
    }

    /// Path of the backing log file.
    pub fn path(&self) -> &Path {
        self.wal.path()
    }

    /// Sorted list of every key currently holding a value.
    pub fn keys(&self) -> StoreResult<Vec<StateKey>> {
        let map = self
            .entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(map.keys().cloned().collect())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &StateKey) -> StoreResult<Option<Vec<u8>>> {
        let map = self
            .entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(map.get(key).cloned())
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut map = self
            .entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        // Log first: the in-memory index only changes once the turn is durable.
        self.wal.append(&batch)?;
        apply_to_map(&mut map, batch);
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        let map = self
            .entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(map.len())
    }
}

impl std::fmt::Debug for FileStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStateStore")
            .field("path", &self.wal.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;

    use super::*;

    fn put(key: StateKey, value: &[u8]) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.put(key, value.to_vec());
        batch
    }

    #[tokio::test]
    async fn reopen_replays_committed_turns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.wal");

        {
            let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
            store.apply(put(StateKey::root("a"), b"1")).await.unwrap();
            store.apply(put(StateKey::element("a", 0), b"x")).await.unwrap();
            let mut delete = WriteBatch::new();
            delete.delete(StateKey::root("a"));
            store.apply(delete).await.unwrap();
        }

        let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
        assert!(store.get(&StateKey::root("a")).await.unwrap().is_none());
        assert_eq!(
            store.get(&StateKey::element("a", 0)).await.unwrap(),
            Some(b"x".to_vec())
        );
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn torn_turn_is_dropped_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.wal");

        let intact_len = {
            let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
            store.apply(put(StateKey::root("q"), b"m1")).await.unwrap();
            let intact_len = store.log_size().unwrap();

            let mut turn = WriteBatch::new();
            turn.put(StateKey::root("q"), b"m2".to_vec());
            turn.put(StateKey::element("q", 0), b"node".to_vec());
            store.apply(turn).await.unwrap();
            intact_len
        };

        // Simulate a crash halfway through writing the second turn.
        let full_len = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(intact_len + (full_len - intact_len) / 2)
            .unwrap();

        let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
        assert_eq!(store.get(&StateKey::root("q")).await.unwrap(), Some(b"m1".to_vec()));
        assert!(store.get(&StateKey::element("q", 0)).await.unwrap().is_none());
        assert_eq!(store.log_size().unwrap(), intact_len);

        // New turns land after the intact prefix and survive a reopen.
        store.apply(put(StateKey::root("r"), b"ok")).await.unwrap();
        drop(store);
        let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
        assert_eq!(store.get(&StateKey::root("r")).await.unwrap(), Some(b"ok".to_vec()));
    }

    #[tokio::test]
    async fn rejected_turn_never_comes_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rejected.wal");

        {
            let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
            store.apply(put(StateKey::root("ok1"), b"1")).await.unwrap();

            store.wal.fail_next_append();
            assert!(store.apply(put(StateKey::root("rejected"), b"x")).await.is_err());
            assert!(store.get(&StateKey::root("rejected")).await.unwrap().is_none());

            store.apply(put(StateKey::root("ok2"), b"2")).await.unwrap();
        }

        let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
        assert_eq!(
            store.keys().unwrap(),
            vec![StateKey::root("ok1"), StateKey::root("ok2")]
        );
    }

    #[tokio::test]
    async fn compact_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.wal");

        let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
        for i in 0..20u64 {
            store.apply(put(StateKey::root("counter"), &i.to_le_bytes())).await.unwrap();
        }
        let before = store.log_size().unwrap();
        store.compact().unwrap();
        assert!(store.log_size().unwrap() < before);
        drop(store);

        let store = FileStateStore::open(&path, WalConfig::default()).unwrap();
        assert_eq!(
            store.get(&StateKey::root("counter")).await.unwrap(),
            Some(19u64.to_le_bytes().to_vec())
        );
        assert_eq!(store.keys().unwrap(), vec![StateKey::root("counter")]);
    }
}
