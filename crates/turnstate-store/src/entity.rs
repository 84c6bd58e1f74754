use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::trace;

use crate::traits::StateStore;
use crate::turn::StateTurn;

/// The owner of a set of named collections.
///
/// An entity processes one logical operation at a time: every turn it
/// hands out holds the entity's turn lock until the turn is committed or
/// dropped, so two operations against the same entity never interleave.
/// Different entities run independently. Collection names only have to be
/// unique within one entity, and each entity should own its own backend.
pub struct StateEntity {
    id: String,
    store: Arc<dyn StateStore>,
    turn_lock: Arc<Mutex<()>>,
}

impl StateEntity {
    pub fn new(id: impl Into<String>, store: Arc<dyn StateStore>) -> Self {
        Self {
            id: id.into(),
            store,
            turn_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Identifier used in log output.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The backend this entity commits to.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Wait for the entity to be idle, then open a turn on it.
    pub async fn begin_turn(&self) -> StateTurn {
        let guard = Arc::clone(&self.turn_lock).lock_owned().await;
        trace!(entity = %self.id, "turn started");
        StateTurn::with_guard(Arc::clone(&self.store), guard)
    }

    /// `true` while some turn on this entity is open.
    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }
}

impl std::fmt::Debug for StateEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateEntity")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .finish()
    }
}
