use std::sync::Arc;

use tracing::debug;
use turnstate_store::StateEntity;

use crate::array::ArrayState;
use crate::config::{CollectionDecl, CollectionKind, StateConfig};
use crate::element::Element;
use crate::error::{Result, StateError};
use crate::list::ListState;
use crate::queue::QueueState;
use crate::stack::StackState;

/// Hands out typed collections bound to one entity, by declared name.
///
/// Every collection an entity owns goes through the same validated
/// [`StateConfig`], so two callers can never open one name as two different
/// kinds or as arrays of different lengths.
#[derive(Debug, Clone)]
pub struct StateFactory {
    entity: Arc<StateEntity>,
    config: StateConfig,
}

impl StateFactory {
    pub fn new(entity: Arc<StateEntity>, config: StateConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            entity = entity.id(),
            collections = config.collections.len(),
            "state factory configured"
        );
        Ok(Self { entity, config })
    }

    pub fn entity(&self) -> &Arc<StateEntity> {
        &self.entity
    }

    pub fn declarations(&self) -> &[CollectionDecl] {
        &self.config.collections
    }

    pub fn array<T: Element + Default>(&self, name: &str) -> Result<ArrayState<T>> {
        let decl = self.lookup(name, CollectionKind::Array)?;
        let length = decl
            .length
            .ok_or_else(|| StateError::config(format!("array '{name}' needs a length")))?;
        ArrayState::new(self.entity.clone(), name, length)
    }

    pub fn queue<T: Element>(&self, name: &str) -> Result<QueueState<T>> {
        self.lookup(name, CollectionKind::Queue)?;
        QueueState::new(self.entity.clone(), name)
    }

    pub fn stack<T: Element>(&self, name: &str) -> Result<StackState<T>> {
        self.lookup(name, CollectionKind::Stack)?;
        StackState::new(self.entity.clone(), name)
    }

    pub fn list<T: Element>(&self, name: &str) -> Result<ListState<T>> {
        self.lookup(name, CollectionKind::List)?;
        ListState::new(self.entity.clone(), name)
    }

    fn lookup(&self, name: &str, kind: CollectionKind) -> Result<&CollectionDecl> {
        let decl = self
            .config
            .get(name)
            .ok_or_else(|| StateError::config(format!("collection '{name}' is not declared")))?;
        if decl.kind != kind {
            return Err(StateError::config(format!(
                "collection '{name}' is declared as {}, not {kind}",
                decl.kind
            )));
        }
        Ok(decl)
    }
}

#[cfg(test)]
mod tests {
    use turnstate_store::InMemoryStateStore;

    use super::*;

    fn factory() -> StateFactory {
        let entity = Arc::new(StateEntity::new("player-7", Arc::new(InMemoryStateStore::new())));
        let config = StateConfig::new()
            .with(CollectionDecl::array("scores", 4))
            .with(CollectionDecl::queue("inbox"))
            .with(CollectionDecl::stack("undo"))
            .with(CollectionDecl::list("friends"));
        StateFactory::new(entity, config).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let entity = Arc::new(StateEntity::new("e", Arc::new(InMemoryStateStore::new())));
        let config = StateConfig::new().with(CollectionDecl::array("a", 0));
        assert!(matches!(
            StateFactory::new(entity, config),
            Err(StateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn undeclared_or_wrong_kind_fails() {
        let factory = factory();
        assert!(matches!(
            factory.queue::<u32>("nope"),
            Err(StateError::InvalidConfig(_))
        ));
        assert!(matches!(
            factory.stack::<u32>("inbox"),
            Err(StateError::InvalidConfig(_))
        ));
        assert!(matches!(
            factory.array::<u32>("friends"),
            Err(StateError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn collections_share_the_entity() {
        let factory = factory();
        assert_eq!(factory.declarations().len(), 4);

        let scores = factory.array::<u32>("scores").unwrap();
        assert_eq!(scores.length(), 4);
        scores.set_at(2, 99).await.unwrap();

        let inbox = factory.queue::<String>("inbox").unwrap();
        inbox.enqueue("hello".to_string()).await.unwrap();

        let undo = factory.stack::<u8>("undo").unwrap();
        undo.push(1).await.unwrap();

        let friends = factory.list::<String>("friends").unwrap();
        friends.add("ada".to_string()).await.unwrap();

        // A second handle to the same name sees the same state.
        let again = factory.array::<u32>("scores").unwrap();
        assert_eq!(again.get_at(2).await.unwrap(), 99);
        assert_eq!(factory.queue::<String>("inbox").unwrap().count().await.unwrap(), 1);

        let store = factory.entity().store();
        // scores root + scores[2], inbox manifest + node, undo manifest + node,
        // friends manifest + node.
        assert_eq!(store.len().await.unwrap(), 8);
    }
}
