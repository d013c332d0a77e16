//! Sectioning of live results.

use std::ops::Range;

use ormfetch_proto::{Direction, OrderSpec, Record, Value};

/// Groups live results into sections by the value of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionBy {
    /// Attribute whose value names the section.
    pub key_path: String,
    /// Order of the sections.
    pub direction: Direction,
}

impl SectionBy {
    /// Section by `key_path`, ordered ascending.
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            direction: Direction::Asc,
        }
    }

    /// Section by `key_path`, ordered the way `sort` orders that attribute.
    pub fn following_sort(key_path: impl Into<String>, sort: &[OrderSpec]) -> Self {
        let key_path = key_path.into();
        let direction = sort
            .iter()
            .find(|spec| spec.field == key_path)
            .map(|spec| spec.direction)
            .unwrap_or(Direction::Asc);
        Self { key_path, direction }
    }

    /// Section key of a record. Missing attributes fall in the null section.
    pub fn key_of(&self, record: &Record) -> Value {
        record.get(&self.key_path).cloned().unwrap_or(Value::Null)
    }
}

/// One section of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionInfo {
    /// Section key value; `Null` for the single section of unsectioned results.
    pub key: Value,
    /// Display name of the section.
    pub name: String,
    /// Position of the section's first row in the flat result.
    pub offset: usize,
    /// Number of rows in the section.
    pub count: usize,
}

impl SectionInfo {
    pub(crate) fn new(key: Value, offset: usize) -> Self {
        let name = if key.is_null() {
            String::new()
        } else {
            key.to_string()
        };
        Self {
            key,
            name,
            offset,
            count: 0,
        }
    }

    /// Flat row range covered by the section.
    pub fn rows(&self) -> Range<usize> {
        self.offset..self.offset + self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormfetch_proto::{ObjectId, StoreId};

    #[test]
    fn test_direction_follows_sort() {
        let sort = vec![OrderSpec::desc("city"), OrderSpec::asc("name")];
        assert_eq!(SectionBy::following_sort("city", &sort).direction, Direction::Desc);
        assert_eq!(SectionBy::following_sort("team", &sort).direction, Direction::Asc);
    }

    #[test]
    fn test_key_and_name() {
        let record = Record::new(
            ObjectId::from_sequence("Person", 1),
            StoreId::from("main"),
            vec![("city".into(), Value::from("Oslo"))],
        );
        let by_city = SectionBy::new("city");
        assert_eq!(by_city.key_of(&record), Value::from("Oslo"));
        assert_eq!(SectionBy::new("team").key_of(&record), Value::Null);

        let section = SectionInfo::new(Value::from("Oslo"), 3);
        assert_eq!(section.name, "Oslo");
        assert_eq!(SectionInfo::new(Value::Null, 0).name, "");
        assert_eq!(section.rows(), 3..3);
    }
}
