//! Execution context identity for re-entrant acquisition.
//!
//! Re-entrancy is tracked per context rather than per OS thread, so it stays
//! correct when a task migrates between runtime workers. A context is passed
//! explicitly; clones share the same identity.

use std::fmt;

use uuid::Uuid;

/// Identity of one logical execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical caller of the lock manager.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    id: ContextId,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            id: ContextId(Uuid::now_v7()),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
