//! Statically typed entities and scalar result types.

use crate::error::ExecutionError;
use ormfetch_proto::{Record, Value};

/// A persistable record type known at compile time.
///
/// The entity name travels with every request through [`crate::FromEntity`], so the
/// engine never has to recover a type from store metadata.
pub trait Entity: Sized {
    /// Name of the entity in the context's model.
    fn entity_name() -> &'static str;

    /// Decode a materialized record.
    fn from_record(record: &Record) -> Result<Self, ExecutionError>;
}

/// A scalar type a value query may return.
pub trait SelectValue: Sized {
    /// Name used in type mismatch diagnostics.
    fn type_name() -> &'static str;

    /// Convert a returned value, or `None` if it does not fit.
    fn from_value(value: &Value) -> Option<Self>;
}

/// Decode one attribute of a record, failing with a type mismatch.
pub fn decode_field<T: SelectValue>(record: &Record, field: &str) -> Result<T, ExecutionError> {
    let value = record
        .get(field)
        .ok_or_else(|| ExecutionError::type_mismatch(T::type_name(), format!("missing {field}")))?;
    T::from_value(value).ok_or_else(|| ExecutionError::type_mismatch(T::type_name(), value.type_name()))
}

impl SelectValue for Value {
    fn type_name() -> &'static str {
        "value"
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl SelectValue for bool {
    fn type_name() -> &'static str {
        "bool"
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl SelectValue for i32 {
    fn type_name() -> &'static str {
        "i32"
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i32()
    }
}

impl SelectValue for i64 {
    fn type_name() -> &'static str {
        "i64"
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl SelectValue for usize {
    fn type_name() -> &'static str {
        "usize"
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|v| usize::try_from(v).ok())
    }
}

impl SelectValue for f64 {
    fn type_name() -> &'static str {
        "f64"
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl SelectValue for String {
    fn type_name() -> &'static str {
        "string"
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl SelectValue for Vec<u8> {
    fn type_name() -> &'static str {
        "bytes"
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormfetch_proto::{ObjectId, StoreId};

    #[test]
    fn test_select_value_conversions() {
        assert_eq!(i64::from_value(&Value::Int32(3)), Some(3));
        assert_eq!(usize::from_value(&Value::Int64(-1)), None);
        assert_eq!(f64::from_value(&Value::Int64(2)), Some(2.0));
        assert_eq!(String::from_value(&Value::Int64(2)), None);
        assert_eq!(bool::from_value(&Value::Bool(false)), Some(false));
    }

    #[test]
    fn test_decode_field() {
        let record = Record::new(
            ObjectId::from_sequence("Person", 1),
            StoreId::from("main"),
            vec![("age".into(), Value::Int32(20))],
        );
        assert_eq!(decode_field::<i32>(&record, "age").unwrap(), 20);
        assert_eq!(
            decode_field::<String>(&record, "age"),
            Err(ExecutionError::type_mismatch("string", "int32"))
        );
        assert!(matches!(
            decode_field::<String>(&record, "name"),
            Err(ExecutionError::TypeMismatch { .. })
        ));
    }
}
