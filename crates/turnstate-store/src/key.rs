use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

const ROOT_TAG: u8 = 0x00;
const ELEMENT_TAG: u8 = 0x01;

/// Structured storage key for collection state.
///
/// A collection's top-level record (array length or linked manifest) lives
/// at the bare name; each element lives at `(name, index)`. Two keys are
/// equal only when both the name and the index are equal, so collections
/// with distinct names can never collide no matter what characters the
/// names contain.
///
/// Keys persist through [`StateKey::encode`], so batches in the turn log
/// carry the canonical bytes rather than serde's struct layout.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "Vec<u8>", try_from = "Vec<u8>")]
pub struct StateKey {
    name: String,
    index: Option<u64>,
}

impl StateKey {
    /// Key of the top-level record for `name`.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    /// Key of the element at `index` under `name`.
    pub fn element(name: impl Into<String>, index: u64) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }

    /// Derive an element key sharing this key's collection name.
    pub fn child(&self, index: u64) -> Self {
        Self::element(self.name.clone(), index)
    }

    /// The collection name this key belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The element index, or `None` for a root key.
    pub fn index(&self) -> Option<u64> {
        self.index
    }

    pub fn is_root(&self) -> bool {
        self.index.is_none()
    }

    /// Canonical byte encoding.
    ///
    /// ```text
    /// [4 bytes: name length (big-endian u32)]
    /// [N bytes: UTF-8 name]
    /// [1 byte:  0x00 root | 0x01 element]
    /// [8 bytes: index (big-endian u64), element keys only]
    /// ```
    ///
    /// The length prefix makes the encoding prefix-free, and big-endian
    /// indices keep byte order equal to numeric order within one name.
    pub fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut out = Vec::with_capacity(4 + name.len() + 9);
        out.extend_from_slice(&(name.len() as u32).to_be_bytes());
        out.extend_from_slice(name);
        match self.index {
            None => out.push(ROOT_TAG),
            Some(index) => {
                out.push(ELEMENT_TAG);
                out.extend_from_slice(&index.to_be_bytes());
            }
        }
        out
    }

    /// Decode a key produced by [`StateKey::encode`].
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        let malformed = |reason: &str| StoreError::Serialization(format!("malformed state key: {reason}"));

        let (len_bytes, rest) = bytes
            .split_first_chunk::<4>()
            .ok_or_else(|| malformed("missing name length"))?;
        let name_len = u32::from_be_bytes(*len_bytes) as usize;
        if rest.len() < name_len + 1 {
            return Err(malformed("truncated name"));
        }
        let (name, rest) = rest.split_at(name_len);
        let name = std::str::from_utf8(name)
            .map_err(|_| malformed("name is not UTF-8"))?
            .to_string();

        match rest {
            [ROOT_TAG] => Ok(Self::root(name)),
            [ELEMENT_TAG, index @ ..] => {
                let index: [u8; 8] = index
                    .try_into()
                    .map_err(|_| malformed("element index must be 8 bytes"))?;
                Ok(Self::element(name, u64::from_be_bytes(index)))
            }
            _ => Err(malformed("unknown key tag")),
        }
    }
}

impl From<StateKey> for Vec<u8> {
    fn from(key: StateKey) -> Self {
        key.encode()
    }
}

impl TryFrom<Vec<u8>> for StateKey {
    type Error = StoreError;

    fn try_from(bytes: Vec<u8>) -> StoreResult<Self> {
        Self::decode(&bytes)
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateKey({self})")
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            None => write!(f, "{}", self.name),
            Some(index) => write!(f, "{}[{index}]", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn root_and_element_differ() {
        let root = StateKey::root("queue");
        let first = StateKey::element("queue", 0);
        assert_ne!(root, first);
        assert_ne!(root.encode(), first.encode());
        assert!(root.is_root());
        assert!(!first.is_root());
    }

    #[test]
    fn child_keeps_name() {
        let root = StateKey::root("orders");
        let child = root.child(7);
        assert_eq!(child.name(), "orders");
        assert_eq!(child.index(), Some(7));
    }

    #[test]
    fn display_format() {
        assert_eq!(StateKey::root("a").to_string(), "a");
        assert_eq!(StateKey::element("a", 3).to_string(), "a[3]");
    }

    #[test]
    fn names_that_look_like_indices_do_not_collide() {
        // A string-formatted "{name}[{index}]" scheme would map both to "a[1]".
        let formatted = StateKey::root("a[1]");
        let structured = StateKey::element("a", 1);
        assert_ne!(formatted, structured);
        assert_ne!(formatted.encode(), structured.encode());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(StateKey::decode(&[]).is_err());
        assert!(StateKey::decode(&[0, 0, 0, 5, b'a']).is_err());
        assert!(StateKey::decode(&[0, 0, 0, 1, b'a', 0x07]).is_err());
        assert!(StateKey::decode(&[0, 0, 0, 1, b'a', ELEMENT_TAG, 1, 2]).is_err());
    }

    #[test]
    fn element_encoding_orders_by_index() {
        let low = StateKey::element("n", 2).encode();
        let high = StateKey::element("n", 300).encode();
        assert!(low < high);
    }

    #[test]
    fn serde_form_is_the_canonical_encoding() {
        let key = StateKey::element("inbox", 42);
        let via_serde = bincode::serialize(&key).unwrap();
        assert_eq!(via_serde, bincode::serialize(&key.encode()).unwrap());
        assert_eq!(bincode::deserialize::<StateKey>(&via_serde).unwrap(), key);
    }

    #[test]
    fn serde_rejects_malformed_key_bytes() {
        let garbage = bincode::serialize(&vec![0u8, 0, 0, 9, b'x']).unwrap();
        assert!(bincode::deserialize::<StateKey>(&garbage).is_err());
    }

    proptest! {
        #[test]
        fn encode_decode_is_identity(name in ".{0,24}", index in proptest::option::of(any::<u64>())) {
            let key = match index {
                None => StateKey::root(name),
                Some(i) => StateKey::element(name, i),
            };
            let decoded = StateKey::decode(&key.encode()).unwrap();
            prop_assert_eq!(decoded, key);
        }

        #[test]
        fn distinct_pairs_encode_distinctly(
            a in "[a-z\\[\\]0-9]{0,8}", i in any::<u64>(),
            b in "[a-z\\[\\]0-9]{0,8}", j in any::<u64>(),
        ) {
            prop_assume!((a.as_str(), i) != (b.as_str(), j));
            prop_assert_ne!(StateKey::element(a, i).encode(), StateKey::element(b, j).encode());
        }
    }
}
