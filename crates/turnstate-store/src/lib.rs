//! Turn-scoped key/value state storage.
//!
//! This crate is the storage layer underneath the turnstate collections. It
//! knows nothing about arrays, queues or lists; it offers a single-key,
//! single-value store whose writes are grouped into atomic turns.
//!
//! # Components
//!
//! - [`StateKey`] -- structured key: a collection name plus an optional
//!   element index
//! - [`StateTurn`] -- the store facade one logical operation works through:
//!   exists / try-read / read-or-initialize / upsert / remove / try-remove,
//!   all buffered until commit
//! - [`StateEntity`] -- owner of a backend that serializes turns, one
//!   logical operation at a time
//! - [`StateStore`] -- backend trait with an all-or-nothing `apply`
//!
//! # Storage Backends
//!
//! - [`InMemoryStateStore`] -- `BTreeMap`-based store for tests and embedding
//! - [`FileStateStore`] -- durable store replaying a checksummed turn log
//!
//! # Design Rules
//!
//! 1. A turn's writes become visible all together or not at all.
//! 2. A turn always reads its own writes.
//! 3. Values are bincode-encoded; the backend never interprets them.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod batch;
pub mod entity;
pub mod error;
pub mod file;
pub mod key;
pub mod memory;
pub mod traits;
pub mod turn;
pub mod wal;

// Re-export primary types at crate root for ergonomic imports.
pub use batch::{WriteBatch, WriteOp};
pub use entity::StateEntity;
pub use error::{StoreError, StoreResult};
pub use file::FileStateStore;
pub use key::StateKey;
pub use memory::InMemoryStateStore;
pub use traits::StateStore;
pub use turn::StateTurn;
pub use wal::{SyncMode, WalConfig};
