//! Error types for the sync engine.

use crate::source::FetchError;
use coursesync_model::{CourseId, StructuralError};
use coursesync_storage::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can end a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A snapshot or the persisted hierarchy is malformed.
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    /// The store failed.
    #[error("storage error: {0}")]
    Storage(StoreError),

    /// Another run holds the course's lease.
    #[error("lease for course {course_id} is held by another run")]
    LeaseContention {
        /// The contended course.
        course_id: CourseId,
    },

    /// The source could not provide a snapshot.
    #[error("fetch error: {0}")]
    Fetch(FetchError),

    /// The requeue cap was reached.
    #[error("gave up on course {course_id} after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// The course.
        course_id: CourseId,
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        last: String,
    },

    /// The worker pool no longer accepts notifications.
    #[error("worker pool is shut down")]
    PoolClosed,
}

/// Broad classes of [`SyncError`], used for reporting and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input; never retried.
    Structural,
    /// A storage failure that may clear on retry.
    TransientStorage,
    /// A storage failure that will not clear on retry.
    FatalStorage,
    /// The lease was held.
    LeaseContention,
    /// The source failed.
    Fetch,
    /// Attempts ran out.
    RetriesExhausted,
    /// The pool was shut down.
    PoolClosed,
}

impl SyncError {
    /// Returns the error's class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Structural(_) => ErrorKind::Structural,
            SyncError::Storage(e) if e.is_transient() => ErrorKind::TransientStorage,
            SyncError::Storage(_) => ErrorKind::FatalStorage,
            SyncError::LeaseContention { .. } => ErrorKind::LeaseContention,
            SyncError::Fetch(_) => ErrorKind::Fetch,
            SyncError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            SyncError::PoolClosed => ErrorKind::PoolClosed,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Lease contention is retryable but counted against its own cap.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientStorage | ErrorKind::LeaseContention | ErrorKind::Fetch
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Structural(e) => SyncError::Structural(e),
            other => SyncError::Storage(other),
        }
    }
}

impl From<FetchError> for SyncError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Malformed(e) => SyncError::Structural(e),
            other => SyncError::Fetch(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::from(StoreError::Timeout {
            limit: Duration::from_secs(1)
        })
        .is_retryable());
        assert!(SyncError::LeaseContention {
            course_id: CourseId::new("c")
        }
        .is_retryable());
        assert!(SyncError::from(FetchError::Unavailable("503".into())).is_retryable());

        assert!(!SyncError::from(StoreError::Corrupted("bad".into())).is_retryable());
        assert!(!SyncError::Structural(StructuralError::EmptyId).is_retryable());
        assert!(!SyncError::PoolClosed.is_retryable());
    }

    #[test]
    fn structural_failures_are_unwrapped() {
        let err = SyncError::from(StoreError::Structural(StructuralError::EmptyId));
        assert_eq!(err.kind(), ErrorKind::Structural);

        let err = SyncError::from(FetchError::Malformed(StructuralError::MalformedOutline(
            "no display_name".into(),
        )));
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn error_display() {
        let err = SyncError::LeaseContention {
            course_id: CourseId::new("math-101"),
        };
        assert_eq!(
            err.to_string(),
            "lease for course math-101 is held by another run"
        );
    }
}
