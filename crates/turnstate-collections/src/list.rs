use std::sync::Arc;

use turnstate_store::{StateEntity, StateTurn};

use crate::element::Element;
use crate::enumerator::LinkedEnumerator;
use crate::error::{Result, StateError};
use crate::linked::LinkedCollection;
use crate::manifest::LinkedManifest;

/// Persistent list with positional access.
///
/// Positions are resolved by walking the chain from whichever end is
/// closer, so positional operations cost O(min(i, n - i)) reads.
pub struct ListState<T> {
    inner: LinkedCollection<T>,
}

impl<T: Element> ListState<T> {
    pub fn new(entity: Arc<StateEntity>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            inner: LinkedCollection::new(entity, name)?,
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Append at the end.
    pub async fn add(&self, value: T) -> Result<()> {
        self.add_all([value]).await
    }

    /// Append several values in one turn, preserving their order.
    pub async fn add_all<I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut turn = self.inner.entity().begin_turn().await;
        self.inner.engine().insert_last(&mut turn, values).await?;
        turn.commit().await?;
        Ok(())
    }

    /// Insert at the front.
    pub async fn add_first(&self, value: T) -> Result<()> {
        self.add_first_all([value]).await
    }

    /// Insert several values at the front in one turn. Each value goes in
    /// front of the previous one, so the last value ends up first.
    pub async fn add_first_all<I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut turn = self.inner.entity().begin_turn().await;
        self.inner.engine().insert_first(&mut turn, values).await?;
        turn.commit().await?;
        Ok(())
    }

    pub async fn first(&self) -> Result<Option<T>> {
        let turn = self.inner.entity().begin_turn().await;
        self.inner.engine().peek_first(&turn).await
    }

    pub async fn last(&self) -> Result<Option<T>> {
        let turn = self.inner.entity().begin_turn().await;
        self.inner.engine().peek_last(&turn).await
    }

    pub async fn get_at(&self, index: u64) -> Result<T> {
        let turn = self.inner.entity().begin_turn().await;
        let manifest = self.manifest(&turn).await?;
        let (_, node) = self.inner.engine().node_at(&turn, &manifest, index).await?;
        Ok(node.value)
    }

    /// Replace the value at `index`, returning the old one.
    pub async fn set_at(&self, index: u64, value: T) -> Result<T> {
        let mut turn = self.inner.entity().begin_turn().await;
        let manifest = self.manifest(&turn).await?;
        let engine = self.inner.engine();
        let (id, mut node) = engine.node_at(&turn, &manifest, index).await?;

        let old = std::mem::replace(&mut node.value, value);
        turn.set(&engine.node_key(id), &node)?;
        turn.commit().await?;
        Ok(old)
    }

    /// Insert so that the new value ends up at `index`. `index == count`
    /// appends.
    pub async fn insert_at(&self, index: u64, value: T) -> Result<()> {
        let mut turn = self.inner.entity().begin_turn().await;
        let mut manifest = self.manifest(&turn).await?;
        let engine = self.inner.engine();

        if index > manifest.count {
            return Err(StateError::IndexOutOfBounds {
                index,
                length: manifest.count + 1,
            });
        }

        if index == manifest.count {
            engine.insert_last(&mut turn, [value]).await?;
        } else if index == 0 {
            engine.insert_first(&mut turn, [value]).await?;
        } else {
            let (id, mut node) = engine.node_at(&turn, &manifest, index).await?;
            engine
                .insert_before(&mut turn, &mut manifest, id, &mut node, value)
                .await?;
        }
        turn.commit().await?;
        Ok(())
    }

    /// Remove and return the value at `index`.
    pub async fn remove_at(&self, index: u64) -> Result<T> {
        let mut turn = self.inner.entity().begin_turn().await;
        let mut manifest = self.manifest(&turn).await?;
        let engine = self.inner.engine();

        let (id, node) = engine.node_at(&turn, &manifest, index).await?;
        engine.remove_node(&mut turn, &mut manifest, None, id, &node).await?;
        turn.commit().await?;
        Ok(node.value)
    }

    /// Remove the first value matching `predicate`.
    pub async fn remove_where<P>(&self, predicate: P) -> Result<Option<T>>
    where
        P: FnMut(&T) -> bool,
    {
        let mut turn = self.inner.entity().begin_turn().await;
        let engine = self.inner.engine();
        let Some(found) = engine.find(&turn, predicate).await? else {
            return Ok(None);
        };

        let mut manifest = self.manifest(&turn).await?;
        engine
            .remove_node(&mut turn, &mut manifest, found.previous, found.id, &found.node)
            .await?;
        turn.commit().await?;
        Ok(Some(found.node.value))
    }

    /// Position of the first value matching `predicate`.
    pub async fn index_of_where<P>(&self, predicate: P) -> Result<Option<u64>>
    where
        P: FnMut(&T) -> bool,
    {
        let turn = self.inner.entity().begin_turn().await;
        let found = self.inner.engine().find(&turn, predicate).await?;
        Ok(found.map(|f| f.position))
    }

    pub async fn contains_where<P>(&self, predicate: P) -> Result<bool>
    where
        P: FnMut(&T) -> bool,
    {
        self.inner.contains_where(predicate).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }

    pub async fn has_state(&self) -> Result<bool> {
        self.inner.has_state().await
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.inner.delete_all().await
    }

    pub fn enumerate(&self) -> LinkedEnumerator<'_, T> {
        self.inner.enumerate()
    }

    async fn manifest(&self, turn: &StateTurn) -> Result<LinkedManifest> {
        Ok(self.inner.engine().manifest(turn).await?.unwrap_or_default())
    }
}

impl<T> std::fmt::Debug for ListState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ListState").field(&self.inner).finish()
    }
}
