//! Error types for storage operations.

use coursesync_model::{ExternalId, StructuralError};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The operation did not finish within its deadline.
    #[error("storage operation exceeded its {limit:?} deadline")]
    Timeout {
        /// The deadline that was exceeded.
        limit: Duration,
    },

    /// Another writer holds the course.
    #[error("storage contention: {0}")]
    Contention(String),

    /// A persisted record could not be decoded.
    #[error("course record corrupted: {0}")]
    Corrupted(String),

    /// The hierarchy would be left malformed.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// An operation targets a node that is not persisted.
    ///
    /// The persisted tree changed after it was read; a fresh run re-reads it.
    #[error("node {id} not found in persisted tree")]
    NodeNotFound {
        /// The missing node.
        id: ExternalId,
    },

    /// An insert targets a node that is already persisted.
    #[error("node {id} already persisted")]
    NodeExists {
        /// The existing node.
        id: ExternalId,
    },

    /// The course was committed by someone else after it was read.
    #[error("course changed since it was read: expected revision {expected}, found {found}")]
    Stale {
        /// Revision the caller read.
        expected: u64,
        /// Revision now committed.
        found: u64,
    },

    /// A failure injected for testing.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Returns true if retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Corrupted(_) | StoreError::Structural(_))
    }
}
