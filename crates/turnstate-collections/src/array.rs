use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;
use turnstate_store::{StateEntity, StateKey, StateTurn};

use crate::element::{validate_name, Element};
use crate::enumerator::ArrayEnumerator;
use crate::error::{Result, StateError};

/// Fixed-length persistent array.
///
/// Element `i` lives at its own key `name[i]`; the root key `name` holds
/// the length. The length declared here must match any length already
/// persisted under the same name. That check runs lazily, before the first
/// index-touching operation, and at most once per instance once it has
/// committed.
///
/// Unwritten elements read as `T::default()`.
pub struct ArrayState<T> {
    entity: Arc<StateEntity>,
    root: StateKey,
    length: u64,
    length_validated: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element + Default> ArrayState<T> {
    pub fn new(entity: Arc<StateEntity>, name: impl Into<String>, length: u64) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        if length < 1 {
            return Err(StateError::config(format!(
                "array '{name}' length must be non-zero"
            )));
        }
        Ok(Self {
            entity,
            root: StateKey::root(name),
            length,
            length_validated: AtomicBool::new(false),
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// Declared length.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub(crate) fn entity(&self) -> &StateEntity {
        &self.entity
    }

    pub(crate) fn element_key(&self, index: u64) -> StateKey {
        self.root.child(index)
    }

    /// `true` if a length has been persisted for this name.
    pub async fn has_state(&self) -> Result<bool> {
        let turn = self.entity.begin_turn().await;
        Ok(turn.exists(&self.root).await?)
    }

    /// Remove the length record and every element. A no-op when no length
    /// has been persisted.
    pub async fn delete_all(&self) -> Result<()> {
        Self::delete_persisted(&self.entity, self.name()).await?;
        self.length_validated.store(false, Ordering::Release);
        Ok(())
    }

    /// The array length, after validating it against persisted state.
    pub async fn count(&self) -> Result<u64> {
        let mut turn = self.entity.begin_turn().await;
        let validated = self.validate_length(&mut turn).await?;
        self.finish(turn, validated).await?;
        Ok(self.length)
    }

    /// Scan `0..length` in order for a stored element matching `predicate`.
    /// Elements never written do not match.
    pub async fn contains_where<P>(&self, mut predicate: P) -> Result<bool>
    where
        P: FnMut(&T) -> bool,
    {
        let mut turn = self.entity.begin_turn().await;
        let validated = self.validate_length(&mut turn).await?;

        let mut found = false;
        for index in 0..self.length {
            if let Some(value) = turn.try_read::<T>(&self.element_key(index)).await? {
                if predicate(&value) {
                    found = true;
                    break;
                }
            }
        }

        self.finish(turn, validated).await?;
        Ok(found)
    }

    /// Element at `index`, or `T::default()` if it was never written.
    pub async fn get_at(&self, index: u64) -> Result<T> {
        let mut turn = self.entity.begin_turn().await;
        let validated = self.validate_length(&mut turn).await?;
        self.check_bounds(index)?;

        let value = turn
            .try_read::<T>(&self.element_key(index))
            .await?
            .unwrap_or_default();

        self.finish(turn, validated).await?;
        Ok(value)
    }

    /// Overwrite the element at `index`.
    pub async fn set_at(&self, index: u64, value: T) -> Result<()> {
        let mut turn = self.entity.begin_turn().await;
        let validated = self.validate_length(&mut turn).await?;
        self.check_bounds(index)?;

        turn.upsert(&self.element_key(index), value, |_, new| new).await?;
        self.finish(turn, validated).await
    }

    /// Index-order enumeration over `0..length`.
    pub fn enumerate(&self) -> ArrayEnumerator<'_, T> {
        ArrayEnumerator::new(self)
    }

    /// Read-or-initialize the persisted length and compare it with the
    /// declared one. Returns `true` if the check ran in this turn, in which
    /// case the caller marks it done once the turn commits.
    pub(crate) async fn validate_length(&self, turn: &mut StateTurn) -> Result<bool> {
        if self.length_validated.load(Ordering::Acquire) {
            return Ok(false);
        }
        let persisted = turn.read_or_initialize(&self.root, self.length).await?;
        if persisted != self.length {
            return Err(StateError::LengthMismatch {
                name: self.name().to_string(),
                declared: self.length,
                persisted,
            });
        }
        Ok(true)
    }

    /// Commit `turn`, then remember a validation that happened in it.
    pub(crate) async fn finish(&self, turn: StateTurn, validated: bool) -> Result<()> {
        turn.commit().await?;
        if validated {
            self.length_validated.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn check_bounds(&self, index: u64) -> Result<()> {
        if index >= self.length {
            return Err(StateError::IndexOutOfBounds {
                index,
                length: self.length,
            });
        }
        Ok(())
    }
}

impl<T> ArrayState<T> {
    /// Delete whatever array state is persisted under `name`, sized by the
    /// persisted length rather than a declared one. Returns `false` when
    /// there was nothing to delete.
    pub async fn delete_persisted(entity: &StateEntity, name: &str) -> Result<bool> {
        validate_name(name)?;
        let root = StateKey::root(name);
        let mut turn = entity.begin_turn().await;
        let Some(persisted) = turn.try_read::<u64>(&root).await? else {
            return Ok(false);
        };

        turn.remove(&root).await?;
        for index in 0..persisted {
            turn.try_remove(&root.child(index)).await?;
        }
        turn.commit().await?;

        debug!(name, length = persisted, "deleted array");
        Ok(true)
    }
}

impl<T> std::fmt::Debug for ArrayState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayState")
            .field("entity", &self.entity.id())
            .field("name", &self.root.name())
            .field("length", &self.length)
            .field("validated", &self.length_validated.load(Ordering::Relaxed))
            .finish()
    }
}
