//! Checkpoint persistence and inspection.

pub mod box_repository;
pub mod repository;
pub mod store;

pub use box_repository::BoxCheckpointRepository;
pub use repository::CheckpointRepository;
pub use store::CheckpointStore;
