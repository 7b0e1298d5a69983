//! Advisory lock keys.
//!
//! A [`LockKey`] is the signed 64-bit integer the store's advisory-lock
//! primitives operate on. Keys are derived from workflow identity strings by
//! hashing with SHA-256 and keeping the first 8 bytes (big-endian, signed).
//! At 64 bits the birthday bound sits around several billion identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix for the lock namespace used while resuming a thread.
///
/// Keeps resume locks disjoint from the primary execution locks taken for
/// the same identifier.
pub const RESUME_LOCK_PREFIX: &str = "latchkey:resume:";

/// A 64-bit advisory lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(i64);

impl LockKey {
    /// Derive the key for an identifier. Pure and deterministic.
    pub fn from_identifier(identifier: &str) -> Self {
        let digest = Sha256::digest(identifier.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(i64::from_be_bytes(prefix))
    }

    /// Wrap a raw key value (e.g. one read back from the store).
    pub const fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// The raw signed value passed to the store.
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the lock that guards resumption of `thread_id`.
pub fn resume_lock_id(thread_id: &str) -> String {
    format!("{RESUME_LOCK_PREFIX}{thread_id}")
}
