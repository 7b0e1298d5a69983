//! Advisory lock management.

pub mod context;
pub mod guard;
pub mod manager;

pub use context::{ContextId, ExecutionContext};
pub use guard::LockGuard;
pub use manager::{AcquireMode, LockManager};
