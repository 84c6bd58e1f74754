use async_trait::async_trait;

use crate::batch::WriteBatch;
use crate::error::StoreResult;
use crate::key::StateKey;

/// Single-key, single-value backend underneath every turn.
///
/// All implementations must satisfy these invariants:
/// - `apply` is all-or-nothing: after it returns, either every operation in
///   the batch is visible or none is.
/// - Reads never observe a partially applied batch.
/// - The store never interprets values; they are opaque encoded bytes.
/// - All I/O errors are propagated, never silently ignored.
///
/// Callers do not talk to a backend directly; they open a
/// [`StateTurn`](crate::turn::StateTurn) through a
/// [`StateEntity`](crate::entity::StateEntity).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the raw value stored under `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    async fn get(&self, key: &StateKey) -> StoreResult<Option<Vec<u8>>>;

    /// Check whether a value is stored under `key`.
    async fn contains(&self, key: &StateKey) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Atomically apply every write in `batch`.
    async fn apply(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Number of keys currently holding a value.
    async fn len(&self) -> StoreResult<usize>;

    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}
