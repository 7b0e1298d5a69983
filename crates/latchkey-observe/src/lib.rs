//! Observability setup for Latchkey.

pub mod tracing_setup;

pub use tracing_setup::{LogFormat, init_tracing};
