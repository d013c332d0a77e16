//! Immutable live result snapshots.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::section::{SectionBy, SectionInfo};
use crate::query::{compare_keys, compare_values_opt, sort_key, sorts_equal};
use ormfetch_proto::{ObjectId, OrderSpec, Record, Value};

/// Position of a row: section index, then row index within the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.row)
    }
}

/// A cached result row: the identifier plus the keys that position it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Row {
    pub id: ObjectId,
    pub sort_key: Vec<Value>,
    pub section_key: Value,
}

impl Row {
    pub fn from_record(record: &Record, sort: &[OrderSpec], section: Option<&SectionBy>) -> Self {
        Self {
            id: record.id.clone(),
            sort_key: sort_key(record, sort),
            section_key: section.map(|s| s.key_of(record)).unwrap_or(Value::Null),
        }
    }

    /// Whether anything positioning the row differs from `other`.
    pub fn keys_differ(&self, other: &Row) -> bool {
        self.sort_key.len() != other.sort_key.len()
            || !sorts_equal(&self.section_key, &other.section_key)
            || self
                .sort_key
                .iter()
                .zip(&other.sort_key)
                .any(|(a, b)| !sorts_equal(a, b))
    }
}

/// An ordered, sectioned set of identifiers.
///
/// Snapshots are never mutated once built. A controller publishes a new one
/// for every change it reconciles.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    rows: Vec<Row>,
    sections: Vec<SectionInfo>,
    positions: HashMap<ObjectId, usize>,
}

impl Snapshot {
    /// An empty snapshot. Unsectioned results always have one section.
    pub(crate) fn empty(sectioned: bool) -> Self {
        let sections = if sectioned {
            vec![]
        } else {
            vec![SectionInfo::new(Value::Null, 0)]
        };
        Self {
            rows: vec![],
            sections,
            positions: HashMap::new(),
        }
    }

    /// Order `rows` and cut them into sections.
    pub(crate) fn build(mut rows: Vec<Row>, sort: &[OrderSpec], section: Option<&SectionBy>) -> Self {
        rows.sort_by(|a, b| {
            let by_section = match section {
                Some(s) => s
                    .direction
                    .apply(compare_values_opt(Some(&a.section_key), Some(&b.section_key))),
                None => Ordering::Equal,
            };
            by_section
                .then_with(|| compare_keys(sort, &a.sort_key, &b.sort_key))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut snapshot = Self::empty(section.is_some());
        for (index, row) in rows.iter().enumerate() {
            if section.is_some() {
                let starts_section = match snapshot.sections.last() {
                    Some(current) => !sorts_equal(&current.key, &row.section_key),
                    None => true,
                };
                if starts_section {
                    snapshot
                        .sections
                        .push(SectionInfo::new(row.section_key.clone(), index));
                }
            }
            if let Some(current) = snapshot.sections.last_mut() {
                current.count += 1;
            }
            snapshot.positions.insert(row.id.clone(), index);
        }
        snapshot.rows = rows;
        snapshot
    }

    /// Identifiers in result order.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.rows.iter().map(|row| row.id.clone()).collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.positions.contains_key(id)
    }

    /// Position of `id` in the flat result.
    pub fn position_of(&self, id: &ObjectId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Section and row of `id`.
    pub fn index_path_of(&self, id: &ObjectId) -> Option<IndexPath> {
        let position = self.position_of(id)?;
        self.sections
            .iter()
            .position(|section| section.rows().contains(&position))
            .map(|section| IndexPath::new(section, position - self.sections[section].offset))
    }

    /// Identifier at an index path.
    pub fn id_at(&self, path: IndexPath) -> Option<&ObjectId> {
        let section = self.sections.get(path.section)?;
        if path.row >= section.count {
            return None;
        }
        self.rows.get(section.offset + path.row).map(|row| &row.id)
    }

    pub(crate) fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn row(&self, id: &ObjectId) -> Option<&Row> {
        self.position_of(id).and_then(|position| self.rows.get(position))
    }
}

/// Shared cell holding the current snapshot.
///
/// Publishing swaps the whole `Arc`, so a reader sees either the previous
/// snapshot or the next one.
#[derive(Debug, Clone, Default)]
pub struct SnapshotReader {
    cell: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotReader {
    pub(crate) fn new(initial: Snapshot) -> Self {
        Self {
            cell: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.cell.read().clone()
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.cell.write() = snapshot.clone();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(seq: u64, city: &str, name: &str) -> Row {
        Row {
            id: ObjectId::from_sequence("Person", seq),
            sort_key: vec![Value::from(name)],
            section_key: Value::from(city),
        }
    }

    #[test]
    fn test_unsectioned_has_one_section() {
        let sort = vec![OrderSpec::asc("name")];
        let snapshot = Snapshot::build(vec![row(1, "Rome", "Bob"), row(2, "Oslo", "Amy")], &sort, None);
        assert_eq!(snapshot.sections().len(), 1);
        assert_eq!(snapshot.sections()[0].count, 2);
        assert_eq!(
            snapshot.object_ids(),
            vec![ObjectId::from_sequence("Person", 2), ObjectId::from_sequence("Person", 1)]
        );
        assert_eq!(Snapshot::empty(false).sections().len(), 1);
        assert!(Snapshot::empty(true).sections().is_empty());
    }

    #[test]
    fn test_sections_and_index_paths() {
        let sort = vec![OrderSpec::asc("name")];
        let by_city = SectionBy::new("city");
        let snapshot = Snapshot::build(
            vec![
                row(1, "Rome", "Bob"),
                row(2, "Oslo", "Cat"),
                row(3, "Oslo", "Amy"),
            ],
            &sort,
            Some(&by_city),
        );

        let names: Vec<_> = snapshot.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Oslo", "Rome"]);
        assert_eq!(
            snapshot.index_path_of(&ObjectId::from_sequence("Person", 2)),
            Some(IndexPath::new(0, 1))
        );
        assert_eq!(
            snapshot.index_path_of(&ObjectId::from_sequence("Person", 1)),
            Some(IndexPath::new(1, 0))
        );
        assert_eq!(
            snapshot.id_at(IndexPath::new(0, 0)),
            Some(&ObjectId::from_sequence("Person", 3))
        );
        assert_eq!(snapshot.id_at(IndexPath::new(1, 1)), None);
        assert_eq!(snapshot.id_at(IndexPath::new(2, 0)), None);
    }

    #[test]
    fn test_numeric_width_is_not_a_key_change() {
        let narrow = Row {
            id: ObjectId::from_sequence("Person", 1),
            sort_key: vec![Value::Int32(18)],
            section_key: Value::Int32(1),
        };
        let wide = Row {
            sort_key: vec![Value::Int64(18)],
            section_key: Value::Int64(1),
            ..narrow.clone()
        };
        assert!(!narrow.keys_differ(&wide));
        assert!(narrow.keys_differ(&Row {
            sort_key: vec![Value::Int64(19)],
            ..wide
        }));
    }

    #[test]
    fn test_reader_sees_whole_snapshots() {
        let reader = SnapshotReader::new(Snapshot::empty(false));
        let before = reader.current();
        reader.publish(Snapshot::build(vec![row(1, "Oslo", "Amy")], &[], None));
        assert!(before.is_empty());
        assert_eq!(reader.current().len(), 1);
    }
}
