//! # coursesync model
//!
//! Course hierarchy model and change detection for coursesync.
//!
//! This crate provides:
//! - [`CourseTree`], a validated Category → Topic → SubTopic hierarchy
//! - [`ChangeOperation`], one delta between two snapshots
//! - [`diff`], the deterministic diff engine
//! - [`CourseTree::apply_ops`], in-memory patching
//! - Mastery record types shared by storage and the engine
//! - Decoding of source course-outline documents
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Example
//!
//! ```rust
//! use coursesync_model::{diff, CourseTree, TreeNode};
//!
//! let old = CourseTree::build(vec![
//!     TreeNode::category("C1", "Maths", 0),
//!     TreeNode::topic("T1", "C1", "Algebra", 0),
//! ])
//! .unwrap();
//! let new = CourseTree::build(vec![
//!     TreeNode::category("C1", "Maths", 0),
//!     TreeNode::topic("T1", "C1", "Algebra I", 0),
//!     TreeNode::topic("T2", "C1", "Algebra II", 1),
//! ])
//! .unwrap();
//!
//! let ops = diff(&old, &new).unwrap();
//! assert_eq!(ops.len(), 2);
//! assert_eq!(old.apply_ops(&ops).unwrap(), new);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod error;
mod mastery;
mod node;
mod operation;
pub mod outline;
mod patch;
mod tree;

pub use diff::{diff, diff_snapshots};
pub use error::{ModelResult, StructuralError};
pub use mastery::{ArchivedMastery, MasteryStatus, RemovalPolicy, TopicMastery};
pub use node::{CourseId, ExternalId, NodeKind, TreeNode, UserId};
pub use operation::{ChangeOperation, OperationKind};
pub use outline::{parse_outline, CourseOutline, OutlineOptions};
pub use tree::{CourseTree, DepthFirst};
