use turnstate_store::StoreError;

/// Errors from collection operations.
///
/// An empty collection or a missing element is not an error; those come
/// back as `None`. Only caller mistakes and store failures end up here.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Invalid construction arguments or collection declarations.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The declared array length disagrees with the persisted one.
    #[error("array '{name}' declared with length {declared} but state holds length {persisted}")]
    LengthMismatch {
        name: String,
        declared: u64,
        persisted: u64,
    },

    /// Index outside `[0, length)`.
    #[error("index {index} must be in range [0, {length})")]
    IndexOutOfBounds { index: u64, length: u64 },

    /// A linked collection's chain does not match its manifest.
    #[error("broken chain in '{name}': {reason}")]
    BrokenChain { name: String, reason: String },

    /// Failure from the underlying store, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StateError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub(crate) fn broken(name: &str, reason: impl Into<String>) -> Self {
        Self::BrokenChain {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias for collection operations.
pub type Result<T> = std::result::Result<T, StateError>;
