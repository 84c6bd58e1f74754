use std::sync::Arc;

use turnstate_store::StateEntity;

use crate::element::Element;
use crate::enumerator::LinkedEnumerator;
use crate::error::Result;
use crate::linked::LinkedCollection;

/// Persistent FIFO queue: enqueue at the tail, dequeue from the head.
pub struct QueueState<T> {
    inner: LinkedCollection<T>,
}

impl<T: Element> QueueState<T> {
    pub fn new(entity: Arc<StateEntity>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            inner: LinkedCollection::new(entity, name)?,
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn enqueue(&self, value: T) -> Result<()> {
        self.enqueue_all([value]).await
    }

    /// Enqueue several values in one turn, preserving their order.
    pub async fn enqueue_all<I>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut turn = self.inner.entity().begin_turn().await;
        self.inner.engine().insert_last(&mut turn, values).await?;
        turn.commit().await?;
        Ok(())
    }

    /// Remove and return the oldest value, or `None` if the queue is empty.
    pub async fn try_dequeue(&self) -> Result<Option<T>> {
        let mut turn = self.inner.entity().begin_turn().await;
        let value = self.inner.engine().remove_first(&mut turn).await?;
        turn.commit().await?;
        Ok(value)
    }

    /// The oldest value without removing it.
    pub async fn try_peek(&self) -> Result<Option<T>> {
        let turn = self.inner.entity().begin_turn().await;
        self.inner.engine().peek_first(&turn).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }

    pub async fn has_state(&self) -> Result<bool> {
        self.inner.has_state().await
    }

    pub async fn contains_where<P>(&self, predicate: P) -> Result<bool>
    where
        P: FnMut(&T) -> bool,
    {
        self.inner.contains_where(predicate).await
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.inner.delete_all().await
    }

    /// Oldest to newest.
    pub fn enumerate(&self) -> LinkedEnumerator<'_, T> {
        self.inner.enumerate()
    }
}

impl<T> std::fmt::Debug for QueueState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("QueueState").field(&self.inner).finish()
    }
}
