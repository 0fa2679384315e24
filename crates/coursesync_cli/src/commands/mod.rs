//! CLI command implementations.

pub mod diff;
pub mod inspect;
pub mod record_mastery;
pub mod sync;
