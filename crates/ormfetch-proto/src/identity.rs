//! Object identifiers and physical store names.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::error::Error;

/// Opaque, stable identifier of a persisted record.
///
/// Identifiers stay valid across contexts, so they are the unit of hand-off
/// between confinements: fetch ids on one context, materialize them on
/// another with `existing_record`.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
pub struct ObjectId {
    /// Entity type the record belongs to.
    pub entity: String,
    /// Store-assigned key.
    pub key: [u8; 16],
}

impl ObjectId {
    /// Create an identifier from an entity name and raw key.
    pub fn new(entity: impl Into<String>, key: [u8; 16]) -> Self {
        Self {
            entity: entity.into(),
            key,
        }
    }

    /// Create an identifier from a monotonically assigned sequence number.
    pub fn from_sequence(entity: impl Into<String>, sequence: u64) -> Self {
        Self::new(entity, (sequence as u128).to_be_bytes())
    }

    /// Hex rendering of the key.
    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Encode for hand-off to another context.
    pub fn to_handoff_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode an identifier produced by [`ObjectId::to_handoff_bytes`].
    pub fn from_handoff_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned = rkyv::util::AlignedVec::<16>::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity, self.key_hex())
    }
}

/// Name of a physical backing store ("configuration").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, SerdeSerialize, SerdeDeserialize)]
pub struct StoreId(pub String);

impl StoreId {
    /// Create a store id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The store name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for StoreId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ids_order_by_sequence() {
        let a = ObjectId::from_sequence("Person", 1);
        let b = ObjectId::from_sequence("Person", 2);
        assert!(a < b);
        assert_eq!(a.to_string(), "Person/00000000000000000000000000000001");
    }

    #[test]
    fn test_handoff_roundtrip() {
        let id = ObjectId::from_sequence("Person", 42);
        let bytes = id.to_handoff_bytes().unwrap();
        assert_eq!(ObjectId::from_handoff_bytes(&bytes).unwrap(), id);
    }

    #[test]
    fn test_handoff_rejects_garbage() {
        assert!(ObjectId::from_handoff_bytes(&[1, 2, 3]).is_err());
    }
}
