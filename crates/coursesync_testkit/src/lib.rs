//! # coursesync testkit
//!
//! Test utilities for coursesync.
//!
//! This crate provides:
//! - Fixtures: sample course trees, seeded stores, temporary file stores
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use coursesync_testkit::prelude::*;
//! use coursesync_model::diff;
//!
//! let ops = diff(&algebra_before(), &algebra_after()).unwrap();
//! assert_eq!(ops.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
