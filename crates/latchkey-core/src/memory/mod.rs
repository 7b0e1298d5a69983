//! In-memory backends.
//!
//! [`MemoryLockStore`] emulates a store's session-scoped advisory locks:
//! a key belongs to one session, re-locking within a session stacks, and
//! dropping a session releases everything it held. [`MemoryCheckpointRepository`]
//! keeps checkpoint chains in a map. Both back the unit tests and are usable
//! for single-process embedding.

pub mod checkpoint;
pub mod lock_store;

pub use checkpoint::MemoryCheckpointRepository;
pub use lock_store::{MemoryLockStore, MemorySession};
