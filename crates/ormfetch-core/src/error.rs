//! Core error types.

use thiserror::Error;

use crate::clause::{ClauseCategory, ClauseKind};
use ormfetch_proto::ObjectId;

/// Errors raised while compiling a clause sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A clause the category requires was not supplied.
    #[error("{category} request requires a {clause} clause")]
    MissingRequiredClause {
        category: ClauseCategory,
        clause: ClauseKind,
    },

    /// A clause was supplied that the category does not accept.
    #[error("{clause} clause is not permitted in a {category} request")]
    ClauseNotPermitted {
        category: ClauseCategory,
        clause: ClauseKind,
    },
}

/// Failures reported by a queryable context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    /// The entity is not part of the context's model.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The predicate cannot be evaluated.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// The projection cannot be evaluated.
    #[error("invalid projection: {0}")]
    InvalidProjection(String),

    /// The record does not exist in this context.
    #[error("record not found: {0}")]
    NotFound(ObjectId),

    /// Any other failure of the backing store.
    #[error("store failure: {0}")]
    Store(String),
}

/// Errors raised by the query executor and the live result controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// The operation was attempted outside the context's confinement.
    #[error("{operation} attempted outside the context's confinement")]
    ConfinementViolation { operation: &'static str },

    /// The clause sequence did not compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// No attached physical store can hold the entity.
    #[error("no persistent store found for entity {entity}")]
    StoreUnavailable { entity: String },

    /// The entity is not part of the context's model.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Records were requested for an abstract entity.
    #[error("entity {0} is abstract and cannot be materialized")]
    AbstractEntity(String),

    /// A returned value could not be converted to the requested type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The live result controller was torn down.
    #[error("live result controller has been invalidated")]
    Invalidated,

    /// Failure propagated from the queryable context.
    #[error("underlying failure: {0}")]
    Underlying(#[from] ContextError),
}

impl ExecutionError {
    /// Create a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        ExecutionError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
