//! The linked collection engine shared by queues, stacks and lists.
//!
//! A linked collection named `n` keeps a [`LinkedManifest`] at the root key
//! `n` and one [`LinkedNode`] per element at `n[id]`. Every engine
//! primitive works inside a caller-supplied [`StateTurn`]; the façades open
//! one turn per public operation and commit it at the end, so a primitive
//! that touches the manifest and two neighbors still lands as one atomic
//! batch.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};
use turnstate_store::{StateEntity, StateKey, StateTurn};

use crate::element::{validate_name, Element};
use crate::enumerator::LinkedEnumerator;
use crate::error::{Result, StateError};
use crate::manifest::{LinkedManifest, LinkedNode};

/// A node resolved by [`LinkedEngine::find`].
#[derive(Debug)]
pub struct Found<T> {
    /// Zero-based position from the head.
    pub position: u64,
    /// The node before this one, already read.
    pub previous: Option<(u64, LinkedNode<T>)>,
    pub id: u64,
    pub node: LinkedNode<T>,
}

/// Manifest + node chain primitives for one collection name.
pub struct LinkedEngine<T> {
    root: StateKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> LinkedEngine<T> {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            root: StateKey::root(name),
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// Key of the manifest record.
    pub fn manifest_key(&self) -> &StateKey {
        &self.root
    }

    /// Key of the node with the given id.
    pub fn node_key(&self, id: u64) -> StateKey {
        self.root.child(id)
    }

    pub async fn manifest(&self, turn: &StateTurn) -> Result<Option<LinkedManifest>> {
        Ok(turn.try_read(&self.root).await?)
    }

    pub async fn node(&self, turn: &StateTurn, id: u64) -> Result<Option<LinkedNode<T>>> {
        Ok(turn.try_read(&self.node_key(id)).await?)
    }

    async fn required_node(&self, turn: &StateTurn, id: u64) -> Result<LinkedNode<T>> {
        self.node(turn, id)
            .await?
            .ok_or_else(|| StateError::broken(self.name(), format!("node {id} is missing")))
    }

    pub async fn has_state(&self, turn: &StateTurn) -> Result<bool> {
        Ok(turn.exists(&self.root).await?)
    }

    pub async fn count(&self, turn: &StateTurn) -> Result<u64> {
        Ok(self.manifest(turn).await?.map_or(0, |m| m.count))
    }

    /// Value at the head, or `None` if the collection is empty.
    pub async fn peek_first(&self, turn: &StateTurn) -> Result<Option<T>> {
        let Some(first) = self.manifest(turn).await?.and_then(|m| m.first) else {
            return Ok(None);
        };
        Ok(self.node(turn, first).await?.map(|node| node.value))
    }

    /// Value at the tail, or `None` if the collection is empty.
    pub async fn peek_last(&self, turn: &StateTurn) -> Result<Option<T>> {
        let Some(last) = self.manifest(turn).await?.and_then(|m| m.last) else {
            return Ok(None);
        };
        Ok(self.node(turn, last).await?.map(|node| node.value))
    }

    /// Insert each value at the head, in argument order (the last value
    /// ends up first). Returns the new element count.
    pub async fn insert_first<I>(&self, turn: &mut StateTurn, values: I) -> Result<u64>
    where
        I: IntoIterator<Item = T>,
    {
        let mut manifest = self.manifest(turn).await?.unwrap_or_default();
        let mut inserted = 0u64;

        for value in values {
            let id = manifest.allocate();
            match manifest.first {
                Some(old_first) => {
                    let mut old = self.required_node(turn, old_first).await?;
                    old.previous = Some(id);
                    turn.set(&self.node_key(old_first), &old)?;
                }
                None => manifest.last = Some(id),
            }
            turn.set(&self.node_key(id), &LinkedNode::new(value, None, manifest.first))?;
            manifest.first = Some(id);
            manifest.count += 1;
            inserted += 1;
        }

        if inserted > 0 {
            turn.set(&self.root, &manifest)?;
            debug!(name = self.name(), inserted, count = manifest.count, "inserted at head");
        }
        Ok(manifest.count)
    }

    /// Insert each value at the tail, in argument order (the last value
    /// ends up last). Returns the new element count.
    pub async fn insert_last<I>(&self, turn: &mut StateTurn, values: I) -> Result<u64>
    where
        I: IntoIterator<Item = T>,
    {
        let mut manifest = self.manifest(turn).await?.unwrap_or_default();
        let mut inserted = 0u64;

        for value in values {
            let id = manifest.allocate();
            match manifest.last {
                Some(old_last) => {
                    let mut old = self.required_node(turn, old_last).await?;
                    old.next = Some(id);
                    turn.set(&self.node_key(old_last), &old)?;
                }
                None => manifest.first = Some(id),
            }
            turn.set(&self.node_key(id), &LinkedNode::new(value, manifest.last, None))?;
            manifest.last = Some(id);
            manifest.count += 1;
            inserted += 1;
        }

        if inserted > 0 {
            turn.set(&self.root, &manifest)?;
            debug!(name = self.name(), inserted, count = manifest.count, "inserted at tail");
        }
        Ok(manifest.count)
    }

    /// Insert `value` directly in front of an already-resolved node.
    /// Returns the id of the new node.
    pub async fn insert_before(
        &self,
        turn: &mut StateTurn,
        manifest: &mut LinkedManifest,
        target_id: u64,
        target: &mut LinkedNode<T>,
        value: T,
    ) -> Result<u64> {
        let id = manifest.allocate();
        match target.previous {
            Some(previous_id) => {
                let mut previous = self.required_node(turn, previous_id).await?;
                previous.next = Some(id);
                turn.set(&self.node_key(previous_id), &previous)?;
            }
            None => manifest.first = Some(id),
        }
        turn.set(&self.node_key(id), &LinkedNode::new(value, target.previous, Some(target_id)))?;

        target.previous = Some(id);
        turn.set(&self.node_key(target_id), &*target)?;

        manifest.count += 1;
        turn.set(&self.root, &*manifest)?;
        debug!(name = self.name(), id, before = target_id, count = manifest.count, "inserted");
        Ok(id)
    }

    /// Unlink and delete an already-resolved node.
    ///
    /// `previous` is the node before the target when the caller already has
    /// it (a forward scan does); otherwise it is read here. The node after
    /// the target is always read here. Boundary removals move the manifest's
    /// `first`/`last` instead of relinking a neighbor.
    pub async fn remove_node(
        &self,
        turn: &mut StateTurn,
        manifest: &mut LinkedManifest,
        previous: Option<(u64, LinkedNode<T>)>,
        target_id: u64,
        target: &LinkedNode<T>,
    ) -> Result<()> {
        if manifest.count == 0 {
            return Err(StateError::broken(
                self.name(),
                format!("cannot remove node {target_id} from an empty manifest"),
            ));
        }

        let previous = match (previous, target.previous) {
            (Some((previous_id, node)), Some(expected)) if previous_id == expected => {
                Some((previous_id, node))
            }
            (Some((previous_id, _)), _) => {
                return Err(StateError::broken(
                    self.name(),
                    format!("node {previous_id} does not precede node {target_id}"),
                ));
            }
            (None, Some(previous_id)) => Some((previous_id, self.required_node(turn, previous_id).await?)),
            (None, None) => None,
        };

        match previous {
            Some((previous_id, mut node)) => {
                node.next = target.next;
                turn.set(&self.node_key(previous_id), &node)?;
            }
            None => manifest.first = target.next,
        }

        match target.next {
            Some(next_id) => {
                let mut node = self.required_node(turn, next_id).await?;
                node.previous = target.previous;
                turn.set(&self.node_key(next_id), &node)?;
            }
            None => manifest.last = target.previous,
        }

        manifest.count -= 1;
        turn.set(&self.root, &*manifest)?;
        turn.remove(&self.node_key(target_id)).await?;

        debug!(name = self.name(), id = target_id, count = manifest.count, "removed");
        Ok(())
    }

    /// Remove and return the head value.
    pub async fn remove_first(&self, turn: &mut StateTurn) -> Result<Option<T>> {
        let Some(mut manifest) = self.manifest(turn).await? else {
            return Ok(None);
        };
        let Some(first) = manifest.first else {
            return Ok(None);
        };
        let Some(node) = self.node(turn, first).await? else {
            return Ok(None);
        };
        self.remove_node(turn, &mut manifest, None, first, &node).await?;
        Ok(Some(node.value))
    }

    /// Remove and return the tail value.
    pub async fn remove_last(&self, turn: &mut StateTurn) -> Result<Option<T>> {
        let Some(mut manifest) = self.manifest(turn).await? else {
            return Ok(None);
        };
        let Some(last) = manifest.last else {
            return Ok(None);
        };
        let Some(node) = self.node(turn, last).await? else {
            return Ok(None);
        };
        self.remove_node(turn, &mut manifest, None, last, &node).await?;
        Ok(Some(node.value))
    }

    /// Resolve the node at `position`, walking from whichever end is closer.
    pub async fn node_at(
        &self,
        turn: &StateTurn,
        manifest: &LinkedManifest,
        position: u64,
    ) -> Result<(u64, LinkedNode<T>)> {
        if position >= manifest.count {
            return Err(StateError::IndexOutOfBounds {
                index: position,
                length: manifest.count,
            });
        }

        let from_head = position <= (manifest.count - 1) / 2;
        let (start, steps) = if from_head {
            (manifest.first, position)
        } else {
            (manifest.last, manifest.count - 1 - position)
        };

        let mut id = start.ok_or_else(|| StateError::broken(self.name(), "manifest has no boundary node"))?;
        let mut node = self.required_node(turn, id).await?;
        for _ in 0..steps {
            let link = if from_head { node.next } else { node.previous };
            id = link.ok_or_else(|| {
                StateError::broken(self.name(), format!("chain ends before position {position}"))
            })?;
            node = self.required_node(turn, id).await?;
        }
        Ok((id, node))
    }

    /// Scan from the head for the first value matching `predicate`.
    pub async fn find<P>(&self, turn: &StateTurn, mut predicate: P) -> Result<Option<Found<T>>>
    where
        P: FnMut(&T) -> bool,
    {
        let Some(manifest) = self.manifest(turn).await? else {
            return Ok(None);
        };

        let mut previous = None;
        let mut cursor = manifest.first;
        let mut position = 0u64;
        while let Some(id) = cursor {
            if position >= manifest.count {
                return Err(StateError::broken(
                    self.name(),
                    format!("chain is longer than count {}", manifest.count),
                ));
            }
            let node = self.required_node(turn, id).await?;
            if predicate(&node.value) {
                return Ok(Some(Found {
                    position,
                    previous,
                    id,
                    node,
                }));
            }
            cursor = node.next;
            previous = Some((id, node));
            position += 1;
        }
        Ok(None)
    }

    /// Delete the manifest and every node reachable from it.
    ///
    /// Returns `false` if there was nothing to delete.
    pub async fn delete_all(&self, turn: &mut StateTurn) -> Result<bool> {
        let Some(manifest) = self.manifest(turn).await? else {
            return Ok(false);
        };
        turn.remove(&self.root).await?;

        let mut cursor = manifest.first;
        let mut removed = 0u64;
        while let Some(id) = cursor {
            if removed >= manifest.count {
                warn!(name = self.name(), count = manifest.count, "chain longer than count; stopping purge");
                break;
            }
            let key = self.node_key(id);
            let node: Option<LinkedNode<T>> = turn.try_read(&key).await?;
            turn.try_remove(&key).await?;
            removed += 1;
            cursor = node.and_then(|n| n.next);
        }

        debug!(name = self.name(), removed, "deleted collection");
        Ok(true)
    }

    /// Walk the chain both ways and check it against the manifest.
    pub async fn verify(&self, turn: &StateTurn) -> Result<()> {
        let Some(manifest) = self.manifest(turn).await? else {
            return Ok(());
        };
        if !manifest.is_consistent() {
            return Err(StateError::broken(self.name(), format!("inconsistent manifest {manifest:?}")));
        }

        let mut forward = Vec::new();
        let mut previous = None;
        let mut cursor = manifest.first;
        while let Some(id) = cursor {
            if forward.len() as u64 >= manifest.count {
                return Err(StateError::broken(self.name(), "forward chain is longer than count"));
            }
            if id >= manifest.next {
                return Err(StateError::broken(self.name(), format!("node id {id} was never allocated")));
            }
            let node = self.required_node(turn, id).await?;
            if node.previous != previous {
                return Err(StateError::broken(
                    self.name(),
                    format!("node {id} links back to {:?}, expected {previous:?}", node.previous),
                ));
            }
            forward.push(id);
            previous = Some(id);
            cursor = node.next;
        }
        if forward.len() as u64 != manifest.count {
            return Err(StateError::broken(
                self.name(),
                format!("chain holds {} nodes, manifest counts {}", forward.len(), manifest.count),
            ));
        }
        if forward.last().copied() != manifest.last {
            return Err(StateError::broken(self.name(), "forward walk does not end at last"));
        }
        Ok(())
    }
}

/// Entity-bound linked collection: opens one turn per operation.
///
/// Queue, stack and list are thin façades over this type; it carries the
/// operations they all share.
pub struct LinkedCollection<T> {
    entity: Arc<StateEntity>,
    engine: LinkedEngine<T>,
}

impl<T: Element> LinkedCollection<T> {
    pub fn new(entity: Arc<StateEntity>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            entity,
            engine: LinkedEngine::new(name)?,
        })
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn engine(&self) -> &LinkedEngine<T> {
        &self.engine
    }

    pub fn entity(&self) -> &Arc<StateEntity> {
        &self.entity
    }

    /// `true` if a manifest exists for this name.
    pub async fn has_state(&self) -> Result<bool> {
        let turn = self.entity.begin_turn().await;
        self.engine.has_state(&turn).await
    }

    pub async fn count(&self) -> Result<u64> {
        let turn = self.entity.begin_turn().await;
        self.engine.count(&turn).await
    }

    pub async fn contains_where<P>(&self, predicate: P) -> Result<bool>
    where
        P: FnMut(&T) -> bool,
    {
        let turn = self.entity.begin_turn().await;
        Ok(self.engine.find(&turn, predicate).await?.is_some())
    }

    /// Remove the manifest and every element. Deleting a collection that
    /// holds no state is a no-op.
    pub async fn delete_all(&self) -> Result<()> {
        let mut turn = self.entity.begin_turn().await;
        self.engine.delete_all(&mut turn).await?;
        turn.commit().await?;
        Ok(())
    }

    /// Check chain integrity against the manifest.
    pub async fn verify(&self) -> Result<()> {
        let turn = self.entity.begin_turn().await;
        self.engine.verify(&turn).await
    }

    /// Head-to-tail enumeration.
    pub fn enumerate(&self) -> LinkedEnumerator<'_, T> {
        LinkedEnumerator::new(&self.entity, &self.engine)
    }
}

impl<T> std::fmt::Debug for LinkedCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedCollection")
            .field("entity", &self.entity.id())
            .field("name", &self.engine.root.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use turnstate_store::{InMemoryStateStore, StateStore};

    use super::*;

    fn turn() -> (Arc<InMemoryStateStore>, StateTurn) {
        let store = Arc::new(InMemoryStateStore::new());
        let turn = StateTurn::new(store.clone());
        (store, turn)
    }

    async fn values(engine: &LinkedEngine<u32>, turn: &StateTurn) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = engine.manifest(turn).await.unwrap().and_then(|m| m.first);
        while let Some(id) = cursor {
            let node = engine.node(turn, id).await.unwrap().unwrap();
            out.push(node.value);
            cursor = node.next;
        }
        out
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(matches!(
            LinkedEngine::<u32>::new(""),
            Err(StateError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn empty_engine_reports_not_found() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("q").unwrap();

        assert!(engine.peek_first(&turn).await.unwrap().is_none());
        assert!(engine.peek_last(&turn).await.unwrap().is_none());
        assert!(engine.remove_first(&mut turn).await.unwrap().is_none());
        assert!(engine.remove_last(&mut turn).await.unwrap().is_none());
        assert_eq!(engine.count(&turn).await.unwrap(), 0);
        assert!(!engine.has_state(&turn).await.unwrap());
        assert!(!turn.is_dirty());
    }

    #[tokio::test]
    async fn insert_last_keeps_argument_order() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("q").unwrap();

        assert_eq!(engine.insert_last(&mut turn, [1, 2, 3]).await.unwrap(), 3);
        assert_eq!(engine.insert_last(&mut turn, [4]).await.unwrap(), 4);
        assert_eq!(values(&engine, &turn).await, vec![1, 2, 3, 4]);
        assert_eq!(engine.peek_first(&turn).await.unwrap(), Some(1));
        assert_eq!(engine.peek_last(&turn).await.unwrap(), Some(4));
        engine.verify(&turn).await.unwrap();
    }

    #[tokio::test]
    async fn insert_first_pushes_each_value() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("s").unwrap();

        engine.insert_first(&mut turn, [1, 2, 3]).await.unwrap();
        assert_eq!(values(&engine, &turn).await, vec![3, 2, 1]);
        engine.verify(&turn).await.unwrap();
    }

    #[tokio::test]
    async fn empty_batch_creates_nothing() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("s").unwrap();
        assert_eq!(engine.insert_last(&mut turn, Vec::new()).await.unwrap(), 0);
        assert!(!turn.is_dirty());
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("q").unwrap();

        engine.insert_last(&mut turn, [1, 2]).await.unwrap();
        engine.remove_first(&mut turn).await.unwrap();
        engine.remove_first(&mut turn).await.unwrap();
        engine.insert_last(&mut turn, [3]).await.unwrap();

        let manifest = engine.manifest(&turn).await.unwrap().unwrap();
        assert_eq!(manifest.next, 3);
        assert_eq!(manifest.first, Some(2));
        assert_eq!(manifest.last, Some(2));
        assert_eq!(manifest.count, 1);
    }

    #[tokio::test]
    async fn removing_last_node_clears_boundaries() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("q").unwrap();

        engine.insert_last(&mut turn, [7]).await.unwrap();
        assert_eq!(engine.remove_last(&mut turn).await.unwrap(), Some(7));

        let manifest = engine.manifest(&turn).await.unwrap().unwrap();
        assert_eq!(manifest.count, 0);
        assert_eq!(manifest.first, None);
        assert_eq!(manifest.last, None);
        assert!(manifest.is_consistent());
        assert!(engine.node(&turn, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_middle_node_with_supplied_previous() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("l").unwrap();
        engine.insert_last(&mut turn, [10, 20, 30]).await.unwrap();

        let found = engine.find(&turn, |v| *v == 20).await.unwrap().unwrap();
        assert_eq!(found.position, 1);
        assert_eq!(found.previous.as_ref().map(|(id, _)| *id), Some(0));

        let mut manifest = engine.manifest(&turn).await.unwrap().unwrap();
        engine
            .remove_node(&mut turn, &mut manifest, found.previous, found.id, &found.node)
            .await
            .unwrap();

        assert_eq!(values(&engine, &turn).await, vec![10, 30]);
        engine.verify(&turn).await.unwrap();
    }

    #[tokio::test]
    async fn remove_node_rejects_wrong_previous() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("l").unwrap();
        engine.insert_last(&mut turn, [1, 2, 3]).await.unwrap();

        let mut manifest = engine.manifest(&turn).await.unwrap().unwrap();
        let head = engine.node(&turn, 0).await.unwrap().unwrap();
        let tail = engine.node(&turn, 2).await.unwrap().unwrap();
        let result = engine
            .remove_node(&mut turn, &mut manifest, Some((0, head)), 2, &tail)
            .await;
        assert!(matches!(result, Err(StateError::BrokenChain { .. })));
    }

    #[tokio::test]
    async fn insert_before_links_both_sides() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("l").unwrap();
        engine.insert_last(&mut turn, [1, 3]).await.unwrap();

        let mut manifest = engine.manifest(&turn).await.unwrap().unwrap();
        let (id, mut node) = engine.node_at(&turn, &manifest, 1).await.unwrap();
        engine
            .insert_before(&mut turn, &mut manifest, id, &mut node, 2)
            .await
            .unwrap();

        // And in front of the head.
        let (id, mut node) = engine.node_at(&turn, &manifest, 0).await.unwrap();
        engine
            .insert_before(&mut turn, &mut manifest, id, &mut node, 0)
            .await
            .unwrap();

        assert_eq!(values(&engine, &turn).await, vec![0, 1, 2, 3]);
        engine.verify(&turn).await.unwrap();
    }

    #[tokio::test]
    async fn node_at_walks_from_either_end() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("l").unwrap();
        engine.insert_last(&mut turn, 0..9).await.unwrap();
        let manifest = engine.manifest(&turn).await.unwrap().unwrap();

        for position in 0..9u64 {
            let (_, node) = engine.node_at(&turn, &manifest, position).await.unwrap();
            assert_eq!(node.value as u64, position);
        }
        assert!(matches!(
            engine.node_at(&turn, &manifest, 9).await,
            Err(StateError::IndexOutOfBounds { index: 9, length: 9 })
        ));
    }

    #[tokio::test]
    async fn delete_all_purges_every_node() {
        let (store, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("q").unwrap();
        engine.insert_last(&mut turn, [1, 2, 3, 4]).await.unwrap();
        engine.remove_first(&mut turn).await.unwrap();
        turn.commit().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 4);

        let mut turn = StateTurn::new(store.clone());
        assert!(engine.delete_all(&mut turn).await.unwrap());
        turn.commit().await.unwrap();
        assert!(store.is_empty().await.unwrap());

        let mut turn = StateTurn::new(store.clone());
        assert!(!engine.delete_all(&mut turn).await.unwrap());
    }

    #[tokio::test]
    async fn verify_detects_count_drift() {
        let (_, mut turn) = turn();
        let engine = LinkedEngine::<u32>::new("q").unwrap();
        engine.insert_last(&mut turn, [1, 2]).await.unwrap();

        let mut manifest = engine.manifest(&turn).await.unwrap().unwrap();
        manifest.count = 3;
        turn.set(engine.manifest_key(), &manifest).unwrap();
        assert!(matches!(
            engine.verify(&turn).await,
            Err(StateError::BrokenChain { .. })
        ));
    }

    #[tokio::test]
    async fn collections_do_not_share_keys() {
        let (store, mut turn) = turn();
        let a = LinkedEngine::<u32>::new("a").unwrap();
        let b = LinkedEngine::<u32>::new("b").unwrap();
        a.insert_last(&mut turn, [1]).await.unwrap();
        b.insert_last(&mut turn, [2]).await.unwrap();
        turn.commit().await.unwrap();

        assert_eq!(store.keys_for("a").unwrap().len(), 2);
        assert_eq!(store.keys_for("b").unwrap().len(), 2);
    }
}
