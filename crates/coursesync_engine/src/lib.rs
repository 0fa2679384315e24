//! # coursesync engine
//!
//! Keeps persisted course hierarchies in step with their source.
//!
//! This crate provides:
//! - [`ChangeProcessor`], all-or-nothing application of a change set
//! - [`MasteryRelinker`], which keeps learner progress attached across
//!   renames and moves and retires it on removal
//! - [`SyncCoordinator`], the per-notification state machine with leases,
//!   requeue and abort
//! - [`WorkerPool`], tokio workers sharing one notification queue
//! - Snapshot sources reading from memory or a directory of outlines
//!
//! ## Architecture
//!
//! ```text
//! notification → lease → fetch + diff → apply (+ re-link) → release → report
//! ```
//!
//! ## Key Invariants
//!
//! - At most one run per course holds the lease while diffing or applying
//! - A change set is committed entirely or not at all
//! - Structural errors are never retried
//! - Mastery records are never created by sync, only kept or retired
//!
//! ## Example
//!
//! ```rust
//! use coursesync_engine::{MemorySource, Notification, SyncConfig, SyncCoordinator, SyncStatus};
//! use coursesync_model::{CourseId, TreeNode};
//! use coursesync_storage::{MemoryCourseStore, MemoryLeaseService};
//! use std::sync::Arc;
//!
//! let source = Arc::new(MemorySource::new());
//! let course = CourseId::new("math-101");
//! source.publish(&course, vec![
//!     TreeNode::category("C1", "Maths", 0),
//!     TreeNode::topic("T1", "C1", "Algebra", 0),
//! ]);
//!
//! let coordinator = SyncCoordinator::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryCourseStore::new()),
//!     Arc::new(MemoryLeaseService::new()),
//!     source,
//! );
//! let result = coordinator.handle(&Notification::new(course));
//! assert_eq!(result.status, SyncStatus::Applied);
//! assert_eq!(result.applied_op_count, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod processor;
mod relinker;
mod source;
mod worker;

pub use config::{BackoffPolicy, RetryConfig, SyncConfig};
pub use coordinator::{
    CoordinatorStats, Notification, SyncCoordinator, SyncPhase, SyncResult, SyncStatus,
};
pub use error::{EngineResult, ErrorKind, SyncError};
pub use processor::{ApplyOutcome, ChangeProcessor, ChangeSet};
pub use relinker::{MasteryRelinker, RelinkSummary};
pub use source::{DirectorySource, FetchError, MemorySource, SnapshotSource};
pub use worker::WorkerPool;
