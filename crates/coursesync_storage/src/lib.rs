//! # coursesync storage
//!
//! Persistence and coordination primitives for coursesync.
//!
//! This crate provides:
//! - [`CourseStore`] and [`CourseTransaction`], the all-or-nothing
//!   persistence interface for course hierarchies and mastery records
//! - [`MemoryCourseStore`], with fault injection for tests
//! - [`FileCourseStore`], one CBOR record file per course
//! - [`LeaseService`] with in-memory and file-backed implementations
//! - [`Deadline`] and [`Clock`] for bounding calls and expiring leases
//!
//! ## Example
//!
//! ```rust
//! use coursesync_model::{CourseId, TreeNode};
//! use coursesync_storage::{CourseStore, Deadline, MemoryCourseStore};
//! use std::time::Duration;
//!
//! let store = MemoryCourseStore::new();
//! let course = CourseId::new("math-101");
//! let deadline = Deadline::after(Duration::from_secs(5));
//!
//! store
//!     .transaction(&course, deadline, |txn| {
//!         txn.insert_node(TreeNode::category("C1", "Maths", 0))?;
//!         txn.tree()?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! assert_eq!(store.load_tree(&course, deadline).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod deadline;
mod error;
mod file;
mod lease;
mod memory;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use deadline::Deadline;
pub use error::{StoreError, StoreResult};
pub use file::{file_stem, FileCourseStore};
pub use lease::{FileLeaseService, Lease, LeaseService, MemoryLeaseService};
pub use memory::MemoryCourseStore;
pub use record::{CourseRecord, FaultPlan, RecordTransaction};
pub use store::{CourseStore, CourseTransaction, NodeUpdate, StoredNode, SurrogateId};
