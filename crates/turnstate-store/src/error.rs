use crate::key::StateKey;

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `remove` was called on a key that holds no value.
    #[error("state key not found: {0}")]
    KeyNotFound(StateKey),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The write-ahead log holds a record that cannot be replayed.
    #[error("corrupt log record at offset {offset}: {reason}")]
    CorruptLog { offset: u64, reason: String },

    /// A backend lock was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
