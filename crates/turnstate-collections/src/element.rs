use serde::de::DeserializeOwned;
use serde::Serialize;

/// Capability every stored element type must have.
///
/// Implemented automatically for any `Serialize + DeserializeOwned` type
/// that can cross threads.
pub trait Element: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Element for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Reject empty collection names.
pub(crate) fn validate_name(name: &str) -> crate::error::Result<()> {
    if name.is_empty() {
        return Err(crate::error::StateError::config("collection name must not be empty"));
    }
    Ok(())
}
