//! Materialized records and attribute maps.

use serde::{Deserialize, Serialize};

use crate::identity::{ObjectId, StoreId};
use crate::value::Value;

/// A record materialized in a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier.
    pub id: ObjectId,
    /// Physical store holding the record.
    pub store: StoreId,
    /// Attribute values.
    pub fields: Vec<(String, Value)>,
}

impl Record {
    /// Create a record.
    pub fn new(id: ObjectId, store: StoreId, fields: Vec<(String, Value)>) -> Self {
        Self { id, store, fields }
    }

    /// Entity type name.
    pub fn entity(&self) -> &str {
        &self.id.entity
    }

    /// Get an attribute value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    /// Set an attribute, replacing an existing value or appending a new one.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field, value)),
        }
    }
}

/// Ordered key → value mapping for one result row of an attribute query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeMap(Vec<(String, Value)>);

impl AttributeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an entry. Keys keep insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First value, in key order.
    pub fn first_value(&self) -> Option<&Value> {
        self.0.first().map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying entries.
    pub fn into_inner(self) -> Vec<(String, Value)> {
        self.0
    }
}

impl From<Vec<(String, Value)>> for AttributeMap {
    fn from(entries: Vec<(String, Value)>) -> Self {
        let mut map = Self::new();
        for (k, v) in entries {
            map.insert(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_set_and_get() {
        let mut record = Record::new(
            ObjectId::from_sequence("Person", 1),
            StoreId::from("main"),
            vec![("name".into(), Value::from("Bob"))],
        );
        record.set("age", 17);
        record.set("age", 18);
        assert_eq!(record.get("age"), Some(&Value::Int32(18)));
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.entity(), "Person");
    }

    #[test]
    fn test_attribute_map_keeps_order() {
        let map = AttributeMap::from(vec![
            ("b".to_string(), Value::Int32(1)),
            ("a".to_string(), Value::Int32(2)),
        ]);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.first_value(), Some(&Value::Int32(1)));
    }
}
