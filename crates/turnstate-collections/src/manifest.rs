use serde::{Deserialize, Serialize};

/// Per-collection record of a linked chain.
///
/// Invariants:
/// - `first` and `last` are both `Some` or both `None`.
/// - `count == 0` exactly when `first`/`last` are `None`.
/// - `count == 1` implies `first == last`.
/// - `next` only grows; an id handed out is never handed out again while
///   this manifest exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedManifest {
    /// Id the next inserted node will receive.
    pub next: u64,
    /// Number of live nodes.
    pub count: u64,
    /// Head node id.
    pub first: Option<u64>,
    /// Tail node id.
    pub last: Option<u64>,
}

impl LinkedManifest {
    /// Hand out a fresh node id.
    pub fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Check the head/tail/count invariants.
    pub fn is_consistent(&self) -> bool {
        match (self.first, self.last) {
            (None, None) => self.count == 0,
            (Some(first), Some(last)) => self.count > 1 || (self.count == 1 && first == last),
            _ => false,
        }
    }
}

/// One stored element plus its neighbor links.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedNode<T> {
    pub value: T,
    pub previous: Option<u64>,
    pub next: Option<u64>,
}

impl<T> LinkedNode<T> {
    pub fn new(value: T, previous: Option<u64>, next: Option<u64>) -> Self {
        Self {
            value,
            previous,
            next,
        }
    }
}
