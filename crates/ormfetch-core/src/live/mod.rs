//! Live, observed result sets.
//!
//! A [`LiveResultController`] fetches once, then keeps its [`Snapshot`] in
//! step with the context by applying change notification batches and
//! reporting each step to an observer as a [`ChangeSet`].

mod changes;
mod controller;
mod section;
mod snapshot;

pub use changes::{ChangeSet, RowChange, SectionChange};
pub use controller::{ControllerHandle, ControllerState, LiveResultController};
pub use section::{SectionBy, SectionInfo};
pub use snapshot::{IndexPath, Snapshot, SnapshotReader};
