//! Thread confinement of queryable contexts.

use std::thread::ThreadId;

use crate::config::ConfinementPolicy;
use crate::diagnostics::Diagnostics;
use crate::error::ExecutionError;

/// The single thread a context is bound to.
///
/// Every compile, execute, and reconcile call for a context must happen on
/// this thread. The check is a precondition, not a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confinement {
    thread: ThreadId,
    label: String,
}

impl Confinement {
    /// Bind to the calling thread.
    pub fn current(label: impl Into<String>) -> Self {
        Self {
            thread: std::thread::current().id(),
            label: label.into(),
        }
    }

    /// Bind to a specific thread.
    pub fn for_thread(thread: ThreadId, label: impl Into<String>) -> Self {
        Self {
            thread,
            label: label.into(),
        }
    }

    /// Human-readable name of the confinement.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the calling thread is the designated one.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread
    }

    /// Verify the calling thread, applying `policy` on violation.
    ///
    /// Under [`ConfinementPolicy::Panic`] a violation panics after being
    /// reported; under [`ConfinementPolicy::Report`] it is reported and
    /// returned as [`ExecutionError::ConfinementViolation`].
    pub fn check(
        &self,
        operation: &'static str,
        policy: ConfinementPolicy,
        diagnostics: &dyn Diagnostics,
    ) -> Result<(), ExecutionError> {
        if self.is_current() {
            return Ok(());
        }

        let message = format!(
            "attempted to {operation} on context '{}' outside its designated thread",
            self.label
        );
        diagnostics.assertion_failure(&message);

        match policy {
            ConfinementPolicy::Panic => panic!("{message}"),
            ConfinementPolicy::Report => Err(ExecutionError::ConfinementViolation { operation }),
        }
    }
}
