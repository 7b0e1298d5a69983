//! Infrastructure layer for Latchkey.
//!
//! Implements the ports defined in `latchkey-core`: PostgreSQL advisory-lock
//! sessions and checkpoint storage, a SQLite checkpoint repository for
//! single-host use, configuration file loading, and startup connection
//! helpers.

pub mod config;
pub mod connect;
pub mod error;
pub mod postgres;
pub mod sqlite;

pub use config::load_config;
pub use connect::{Connected, connect, connect_with_retry};
