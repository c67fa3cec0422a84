//! # Error Types
//!
//! BurrowDB uses a single typed error union for every fallible operation.
//! The variants split into two classes:
//!
//! - **Recoverable outcomes** the caller is expected to branch on:
//!   [`Error::NotFound`], [`Error::AlreadyExists`], [`Error::Locked`].
//! - **Fatal failures** that should propagate to the process boundary:
//!   [`Error::Io`], [`Error::OutOfMemory`], [`Error::Corruption`]. There is
//!   no transaction log to roll back to, so the core never retries these
//!   internally.
//!
//! Recoverable variants carry the key they refer to; fatal variants carry
//! enough context (offset, requested size, detail string) for the caller to
//! build a diagnostic. The core itself never formats user-facing messages
//! beyond the `Display` impls here.

use crate::types::Key;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key is absent from the tree, or present only as a tombstone.
    #[error("key {key} not found")]
    NotFound { key: Key },

    /// Insert collided with an existing entry; the stored value is unchanged.
    #[error("key {key} already exists")]
    AlreadyExists { key: Key },

    /// The record's metadata has `syslock` set; the mutation was refused.
    #[error("record {key} is write-protected")]
    Locked { key: Key },

    /// Underlying seek/read/write failure. Fatal within the core.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// An allocation request the pager cannot satisfy. Fatal within the core.
    #[error("allocation of {requested} bytes failed")]
    OutOfMemory { requested: u64 },

    /// On-disk state failed validation (bad magic, CRC mismatch, offset out
    /// of bounds, inconsistent structure).
    #[error("corruption detected: {detail}")]
    Corruption { detail: String },
}

impl Error {
    pub(crate) fn corruption(detail: impl Into<String>) -> Self {
        Error::Corruption {
            detail: detail.into(),
        }
    }

    /// True for the outcomes a caller is expected to handle by branching
    /// rather than by aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::AlreadyExists { .. } | Error::Locked { .. }
        )
    }
}
