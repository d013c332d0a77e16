//! Change notifications delivered to observers of a context.

use serde::{Deserialize, Serialize};

use crate::identity::{ObjectId, StoreId};

/// Types of changes that can occur to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// A new record was inserted.
    Insert,
    /// An existing record was updated.
    Update,
    /// A record was deleted.
    Delete,
}

/// A change to one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The type of change.
    pub change_type: ChangeType,
    /// The changed record.
    pub object_id: ObjectId,
    /// The attributes that changed (empty for inserts and deletes).
    pub changed_fields: Vec<String>,
}

impl ChangeEvent {
    /// An insert event.
    pub fn insert(object_id: ObjectId) -> Self {
        Self {
            change_type: ChangeType::Insert,
            object_id,
            changed_fields: vec![],
        }
    }

    /// An update event.
    pub fn update(object_id: ObjectId, changed_fields: Vec<String>) -> Self {
        Self {
            change_type: ChangeType::Update,
            object_id,
            changed_fields,
        }
    }

    /// A delete event.
    pub fn delete(object_id: ObjectId) -> Self {
        Self {
            change_type: ChangeType::Delete,
            object_id,
            changed_fields: vec![],
        }
    }

    /// Entity type of the changed record.
    pub fn entity(&self) -> &str {
        &self.object_id.entity
    }
}

/// A message delivered on a change subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeNotification {
    /// A batch of record changes, in the order they were made.
    Batch(Vec<ChangeEvent>),
    /// The set of attached physical stores changed; carries the new set.
    StoresChanged(Vec<StoreId>),
}
