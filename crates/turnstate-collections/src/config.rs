use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::element::validate_name;
use crate::error::{Result, StateError};

/// Which collection type a declaration describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Array,
    Queue,
    Stack,
    List,
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Array => "array",
            Self::Queue => "queue",
            Self::Stack => "stack",
            Self::List => "list",
        };
        f.write_str(name)
    }
}

/// One named collection. `length` is required for arrays and must be
/// absent for the linked kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDecl {
    pub name: String,
    pub kind: CollectionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl CollectionDecl {
    pub fn array(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            kind: CollectionKind::Array,
            length: Some(length),
        }
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self::linked(name, CollectionKind::Queue)
    }

    pub fn stack(name: impl Into<String>) -> Self {
        Self::linked(name, CollectionKind::Stack)
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self::linked(name, CollectionKind::List)
    }

    fn linked(name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            length: None,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        match (self.kind, self.length) {
            (CollectionKind::Array, None) => Err(StateError::config(format!(
                "array '{}' needs a length",
                self.name
            ))),
            (CollectionKind::Array, Some(0)) => Err(StateError::config(format!(
                "array '{}' length must be non-zero",
                self.name
            ))),
            (CollectionKind::Array, Some(_)) => Ok(()),
            (kind, Some(_)) => Err(StateError::config(format!(
                "{kind} '{}' does not take a length",
                self.name
            ))),
            (_, None) => Ok(()),
        }
    }
}

/// Declarative set of collections owned by one entity.
///
/// ```toml
/// [[collections]]
/// name = "scores"
/// kind = "array"
/// length = 8
///
/// [[collections]]
/// name = "inbox"
/// kind = "queue"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub collections: Vec<CollectionDecl>,
}

impl StateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration. Validation is deferred to [`StateConfig::validate`].
    pub fn with(mut self, decl: CollectionDecl) -> Self {
        self.collections.push(decl);
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| StateError::config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            StateError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| StateError::config(e.to_string()))
    }

    /// Names must be non-empty and unique; arrays need a non-zero length.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for decl in &self.collections {
            decl.validate()?;
            if !seen.insert(decl.name.as_str()) {
                return Err(StateError::config(format!(
                    "collection '{}' declared more than once",
                    decl.name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CollectionDecl> {
        self.collections.iter().find(|d| d.name == name)
    }
}
