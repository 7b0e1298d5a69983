//! Coordination logic and port traits for Latchkey.
//!
//! This crate defines the ports (`SessionPool`, `LockSession`,
//! `CheckpointRepository`) that the infrastructure layer implements, and the
//! logic built on them: advisory lock management, process-wide shutdown
//! coordination, checkpoint inspection, resume coordination, and the
//! lock-protected executor. It depends only on `latchkey-types` -- never on
//! `latchkey-infra` or any database crate.

pub mod checkpoint;
pub mod executor;
pub mod lock;
pub mod memory;
pub mod pipeline;
pub mod pool;
pub mod resume;
pub mod service;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod test_support;
