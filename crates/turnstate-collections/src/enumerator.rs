//! Restartable, lazy, read-only enumeration over collections.
//!
//! Each advance runs in its own turn, so an enumerator never holds the
//! entity between elements. Mutations made between two advances are
//! visible to the next one; nothing is isolated beyond never reading past
//! the array length or the end of the chain.

use futures::stream::{self, Stream};
use turnstate_store::StateEntity;

use crate::array::ArrayState;
use crate::element::Element;
use crate::error::{Result, StateError};
use crate::linked::LinkedEngine;

/// Index-order cursor over an [`ArrayState`].
pub struct ArrayEnumerator<'a, T> {
    array: &'a ArrayState<T>,
    index: u64,
}

impl<'a, T: Element + Default> ArrayEnumerator<'a, T> {
    pub(crate) fn new(array: &'a ArrayState<T>) -> Self {
        Self { array, index: 0 }
    }

    /// Advance, yielding `T::default()` for elements never written.
    pub async fn next(&mut self) -> Result<Option<T>> {
        let mut turn = self.array.entity().begin_turn().await;
        let validated = self.array.validate_length(&mut turn).await?;

        if self.index >= self.array.length() {
            self.array.finish(turn, validated).await?;
            return Ok(None);
        }

        let value = turn
            .try_read::<T>(&self.array.element_key(self.index))
            .await?
            .unwrap_or_default();
        self.array.finish(turn, validated).await?;

        self.index += 1;
        Ok(Some(value))
    }

    /// Restart from index 0.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Index the next advance will read.
    pub fn position(&self) -> u64 {
        self.index
    }

    /// Drain the remaining elements.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(value) = self.next().await? {
            out.push(value);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + 'a {
        stream::try_unfold(self, |mut cursor| async move {
            let item = cursor.next().await?;
            Ok::<_, StateError>(item.map(|value| (value, cursor)))
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cursor {
    Start,
    At(u64),
    Done,
}

/// Chain-order cursor over a linked collection, head to tail.
pub struct LinkedEnumerator<'a, T> {
    entity: &'a StateEntity,
    engine: &'a LinkedEngine<T>,
    cursor: Cursor,
}

impl<'a, T: Element> LinkedEnumerator<'a, T> {
    pub(crate) fn new(entity: &'a StateEntity, engine: &'a LinkedEngine<T>) -> Self {
        Self {
            entity,
            engine,
            cursor: Cursor::Start,
        }
    }

    /// Advance along `next` links. The head is resolved on the first
    /// advance, not at construction.
    pub async fn next(&mut self) -> Result<Option<T>> {
        let turn = self.entity.begin_turn().await;
        let id = match self.cursor {
            Cursor::Done => return Ok(None),
            Cursor::At(id) => id,
            Cursor::Start => match self.engine.manifest(&turn).await?.and_then(|m| m.first) {
                Some(id) => id,
                None => {
                    self.cursor = Cursor::Done;
                    return Ok(None);
                }
            },
        };

        match self.engine.node(&turn, id).await? {
            Some(node) => {
                self.cursor = node.next.map_or(Cursor::Done, Cursor::At);
                Ok(Some(node.value))
            }
            // Removed since the previous advance.
            None => {
                self.cursor = Cursor::Done;
                Ok(None)
            }
        }
    }

    /// Restart from the current head.
    pub fn reset(&mut self) {
        self.cursor = Cursor::Start;
    }

    pub fn is_done(&self) -> bool {
        self.cursor == Cursor::Done
    }

    /// Drain the remaining elements.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(value) = self.next().await? {
            out.push(value);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + 'a {
        stream::try_unfold(self, |mut cursor| async move {
            let item = cursor.next().await?;
            Ok::<_, StateError>(item.map(|value| (value, cursor)))
        })
    }
}
