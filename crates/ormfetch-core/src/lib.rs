//! ormfetch Core - Clause composition, query execution, and live results.
//!
//! Requests are written as ordered sequences of [`Clause`]s, compiled into a
//! [`FetchDescriptor`], and executed against any [`QueryableContext`] either
//! once through a [`QueryExecutor`] or continuously through a
//! [`LiveResultController`].

pub mod clause;
pub mod compiler;
pub mod config;
pub mod confinement;
pub mod context;
pub mod descriptor;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod executor;
pub mod live;
pub mod memory;
pub mod query;

pub use clause::{Clause, ClauseCategory, ClauseKind, EntitySelector, FromEntity, Select, Tweak};
pub use compiler::{compile, ClauseCompiler};
pub use config::{ConfinementPolicy, EngineConfig, DEFAULT_NOTIFICATION_BATCH_LIMIT};
pub use confinement::Confinement;
pub use context::{
    resolve_affected_stores, ChangeReceiver, EntityModel, QueryableContext, Subscription,
    SubscriptionId,
};
pub use descriptor::FetchDescriptor;
pub use diagnostics::{
    default_diagnostics, DiagnosticLevel, DiagnosticRecord, Diagnostics, NoopDiagnostics,
    RecordingDiagnostics, TracingDiagnostics,
};
pub use entity::{decode_field, Entity, SelectValue};
pub use error::{CompileError, ContextError, ExecutionError};
pub use executor::QueryExecutor;
pub use live::{
    ChangeSet, ControllerHandle, ControllerState, IndexPath, LiveResultController, RowChange,
    SectionBy, SectionChange, SectionInfo, Snapshot, SnapshotReader,
};
pub use memory::{ChangePublisher, MemoryContext};

/// Re-export protocol types.
pub use ormfetch_proto as proto;
