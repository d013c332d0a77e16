//! ORMFetch protocol types.
//!
//! This crate defines the data shared by the clause compiler, the query
//! executor, and any queryable context implementation.
//!
//! # Modules
//!
//! - [`value`] - Runtime attribute values
//! - [`identity`] - Object identifiers and physical store names
//! - [`predicate`] - Predicate trees
//! - [`order`] - Sort specifications
//! - [`select`] - Projection terms and result shapes
//! - [`record`] - Materialized records and attribute maps
//! - [`change`] - Change notifications
//! - [`error`] - Protocol error types
//!
//! Identifiers derive `rkyv` so they can be handed across contexts as bytes:
//!
//! ```ignore
//! use ormfetch_proto::ObjectId;
//!
//! let id = ObjectId::from_sequence("Person", 7);
//! let bytes = id.to_handoff_bytes()?;
//! assert_eq!(ObjectId::from_handoff_bytes(&bytes)?, id);
//! ```

pub mod change;
pub mod error;
pub mod identity;
pub mod order;
pub mod predicate;
pub mod record;
pub mod select;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use change::{ChangeEvent, ChangeNotification, ChangeType};
pub use identity::{ObjectId, StoreId};
pub use order::{Direction, OrderSpec};
pub use predicate::Predicate;
pub use record::{AttributeMap, Record};
pub use select::{AggregateFunction, Projection, ResultShape, SelectTerm};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let value = Value::String("hello".into());
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&value).unwrap();
        let archived =
            rkyv::access::<value::ArchivedValue, rkyv::rancor::Error>(&bytes).unwrap();
        let deserialized: Value =
            rkyv::deserialize::<Value, rkyv::rancor::Error>(archived).unwrap();
        assert_eq!(value, deserialized);
    }

    #[test]
    fn test_order_spec_roundtrip() {
        let spec = OrderSpec::desc("created_at");
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&spec).unwrap();
        let deserialized: OrderSpec =
            rkyv::from_bytes::<OrderSpec, rkyv::rancor::Error>(&bytes).unwrap();
        assert_eq!(spec, deserialized);
    }
}
