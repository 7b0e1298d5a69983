//! Shared domain types for Latchkey.
//!
//! This crate contains the types shared by every layer of the workflow
//! coordination stack: lock keys, checkpoints, outcomes, health reports,
//! configuration, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, sha2.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod health;
pub mod lock;
pub mod outcome;
pub mod thread;
