//! Change sets reported to live result observers.

use std::collections::BTreeSet;

use super::snapshot::{IndexPath, Snapshot};
use crate::query::sorts_equal;
use ormfetch_proto::{ObjectId, Value};

/// A change to one row of a live result.
///
/// `Delete` and the source of a `Move` use index paths in the previous
/// snapshot; `Insert` and the target of a `Move` use the new snapshot.
/// `Update` uses the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowChange {
    Insert { id: ObjectId, at: IndexPath },
    Delete { id: ObjectId, at: IndexPath },
    Update { id: ObjectId, at: IndexPath },
    Move { id: ObjectId, from: IndexPath, to: IndexPath },
}

impl RowChange {
    /// The changed record.
    pub fn id(&self) -> &ObjectId {
        match self {
            RowChange::Insert { id, .. }
            | RowChange::Delete { id, .. }
            | RowChange::Update { id, .. }
            | RowChange::Move { id, .. } => id,
        }
    }
}

/// A section appearing or disappearing.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionChange {
    Insert { index: usize, key: Value },
    Delete { index: usize, key: Value },
}

/// Everything that changed between two snapshots.
///
/// Section changes come first, then row deletes, inserts, moves, and updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub sections: Vec<SectionChange>,
    pub rows: Vec<RowChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.rows.is_empty()
    }

    pub fn inserted(&self) -> impl Iterator<Item = &ObjectId> {
        self.rows.iter().filter_map(|change| match change {
            RowChange::Insert { id, .. } => Some(id),
            _ => None,
        })
    }

    pub fn deleted(&self) -> impl Iterator<Item = &ObjectId> {
        self.rows.iter().filter_map(|change| match change {
            RowChange::Delete { id, .. } => Some(id),
            _ => None,
        })
    }

    pub fn updated(&self) -> impl Iterator<Item = &ObjectId> {
        self.rows.iter().filter_map(|change| match change {
            RowChange::Update { id, .. } => Some(id),
            _ => None,
        })
    }

    pub fn moved(&self) -> impl Iterator<Item = &ObjectId> {
        self.rows.iter().filter_map(|change| match change {
            RowChange::Move { id, .. } => Some(id),
            _ => None,
        })
    }

    /// Compute the changes turning `old` into `new`.
    ///
    /// Rows present in both are reported only if `touched` names them or
    /// their sort or section keys changed: as a move when their keys changed
    /// and their index path differs, otherwise as an update.
    pub fn between(old: &Snapshot, new: &Snapshot, touched: &BTreeSet<ObjectId>) -> Self {
        let mut changes = ChangeSet::default();

        changes.diff_sections(old, new);

        for row in old.rows() {
            if !new.contains(&row.id) {
                if let Some(at) = old.index_path_of(&row.id) {
                    changes.rows.push(RowChange::Delete {
                        id: row.id.clone(),
                        at,
                    });
                }
            }
        }

        for row in new.rows() {
            if !old.contains(&row.id) {
                if let Some(at) = new.index_path_of(&row.id) {
                    changes.rows.push(RowChange::Insert {
                        id: row.id.clone(),
                        at,
                    });
                }
            }
        }

        let mut updates = Vec::new();
        for row in new.rows() {
            let Some(previous) = old.row(&row.id) else {
                continue;
            };
            let keys_changed = previous.keys_differ(row);
            if !keys_changed && !touched.contains(&row.id) {
                continue;
            }

            let (Some(from), Some(to)) = (old.index_path_of(&row.id), new.index_path_of(&row.id)) else {
                continue;
            };
            if keys_changed && from != to {
                changes.rows.push(RowChange::Move {
                    id: row.id.clone(),
                    from,
                    to,
                });
            } else {
                updates.push(RowChange::Update {
                    id: row.id.clone(),
                    at: from,
                });
            }
        }
        changes.rows.extend(updates);

        changes
    }

    fn diff_sections(&mut self, old: &Snapshot, new: &Snapshot) {
        let has = |snapshot: &Snapshot, key: &Value| {
            snapshot
                .sections()
                .iter()
                .any(|section| sorts_equal(&section.key, key))
        };

        for (index, section) in old.sections().iter().enumerate() {
            if !has(new, &section.key) {
                self.sections.push(SectionChange::Delete {
                    index,
                    key: section.key.clone(),
                });
            }
        }
        for (index, section) in new.sections().iter().enumerate() {
            if !has(old, &section.key) {
                self.sections.push(SectionChange::Insert {
                    index,
                    key: section.key.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::section::SectionBy;
    use crate::live::snapshot::Row;
    use ormfetch_proto::OrderSpec;

    fn id(seq: u64) -> ObjectId {
        ObjectId::from_sequence("Person", seq)
    }

    fn row(seq: u64, city: &str, name: &str) -> Row {
        Row {
            id: id(seq),
            sort_key: vec![Value::from(name)],
            section_key: Value::from(city),
        }
    }

    fn build(rows: Vec<Row>) -> Snapshot {
        Snapshot::build(rows, &[OrderSpec::asc("name")], Some(&SectionBy::new("city")))
    }

    #[test]
    fn test_insert_and_delete() {
        let old = build(vec![row(1, "Oslo", "Amy"), row(2, "Oslo", "Bob")]);
        let new = build(vec![row(1, "Oslo", "Amy"), row(3, "Oslo", "Cat")]);
        let changes = ChangeSet::between(&old, &new, &BTreeSet::new());

        assert!(changes.sections.is_empty());
        assert_eq!(
            changes.rows,
            vec![
                RowChange::Delete {
                    id: id(2),
                    at: IndexPath::new(0, 1)
                },
                RowChange::Insert {
                    id: id(3),
                    at: IndexPath::new(0, 1)
                },
            ]
        );
    }

    #[test]
    fn test_section_relocation_is_one_move() {
        let old = build(vec![row(1, "Oslo", "Amy"), row(2, "Oslo", "Bob")]);
        let new = build(vec![row(1, "Oslo", "Amy"), row(2, "Rome", "Bob")]);
        let touched = BTreeSet::from([id(2)]);
        let changes = ChangeSet::between(&old, &new, &touched);

        assert_eq!(
            changes.sections,
            vec![SectionChange::Insert {
                index: 1,
                key: Value::from("Rome")
            }]
        );
        assert_eq!(
            changes.rows,
            vec![RowChange::Move {
                id: id(2),
                from: IndexPath::new(0, 1),
                to: IndexPath::new(1, 0)
            }]
        );
    }

    #[test]
    fn test_touched_without_key_change_is_update() {
        let old = build(vec![row(1, "Oslo", "Amy")]);
        let new = build(vec![row(1, "Oslo", "Amy")]);
        let changes = ChangeSet::between(&old, &new, &BTreeSet::from([id(1)]));
        assert_eq!(changes.updated().collect::<Vec<_>>(), vec![&id(1)]);
        assert!(ChangeSet::between(&old, &new, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_emptied_section_is_deleted() {
        let old = build(vec![row(1, "Oslo", "Amy"), row(2, "Rome", "Bob")]);
        let new = build(vec![row(1, "Oslo", "Amy")]);
        let changes = ChangeSet::between(&old, &new, &BTreeSet::new());
        assert_eq!(
            changes.sections,
            vec![SectionChange::Delete {
                index: 1,
                key: Value::from("Rome")
            }]
        );
        assert_eq!(changes.deleted().collect::<Vec<_>>(), vec![&id(2)]);
    }
}
