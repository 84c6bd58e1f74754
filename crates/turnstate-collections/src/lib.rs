//! Persistent collections over turn-scoped state.
//!
//! Each collection lives inside one [`StateEntity`](turnstate_store::StateEntity)
//! and is spread across many keys of its store, one element per key, so a
//! single operation touches only the handful of keys it needs. Every public
//! operation runs as one turn and commits atomically.
//!
//! # Collections
//!
//! - [`ArrayState`] -- fixed-length array; unwritten slots read as default
//! - [`QueueState`] -- FIFO over a doubly linked chain
//! - [`StackState`] -- LIFO over the same chain
//! - [`ListState`] -- positional list over the same chain
//!
//! # Layout
//!
//! An array stores its length at `name` and element `i` at `name[i]`. A
//! linked collection stores a [`LinkedManifest`] at `name` and node `id` at
//! `name[id]`. Node ids come from a monotonic allocator and are never
//! reused, so a stale id can never alias a newer element.
//!
//! # Configuration
//!
//! [`StateConfig`] declares an entity's collections (loadable from TOML);
//! [`StateFactory`] validates it and hands out typed handles by name.

pub mod array;
pub mod config;
pub mod element;
pub mod enumerator;
pub mod error;
pub mod factory;
pub mod linked;
pub mod list;
pub mod manifest;
pub mod queue;
pub mod stack;

pub use array::ArrayState;
pub use config::{CollectionDecl, CollectionKind, StateConfig};
pub use element::Element;
pub use enumerator::{ArrayEnumerator, LinkedEnumerator};
pub use error::{Result, StateError};
pub use factory::StateFactory;
pub use linked::{Found, LinkedCollection, LinkedEngine};
pub use list::ListState;
pub use manifest::{LinkedManifest, LinkedNode};
pub use queue::QueueState;
pub use stack::StackState;
