//! Error types for the course model.

use crate::node::{ExternalId, NodeKind};
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, StructuralError>;

/// A course tree (or an operation against it) violates the hierarchy rules.
///
/// Structural errors are never retryable: the same input always fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralError {
    /// A node carries an empty external identifier.
    #[error("node has an empty external id")]
    EmptyId,

    /// Two nodes share an external identifier.
    #[error("duplicate external id {id}")]
    DuplicateId {
        /// The repeated identifier.
        id: ExternalId,
    },

    /// A node references a parent that is not in the tree.
    #[error("node {id} references missing parent {parent}")]
    MissingParent {
        /// The orphaned node.
        id: ExternalId,
        /// The parent it points to.
        parent: ExternalId,
    },

    /// A node sits under a parent of the wrong kind (or lacks one).
    #[error("{kind} {id} cannot be placed under {}", describe_parent(.parent, .parent_kind))]
    InvalidParent {
        /// The misplaced node.
        id: ExternalId,
        /// Its kind.
        kind: NodeKind,
        /// The parent it points to, if any.
        parent: Option<ExternalId>,
        /// The parent's kind, if the parent exists.
        parent_kind: Option<NodeKind>,
    },

    /// Following parent links from a node returns to the node.
    #[error("cycle detected through node {id}")]
    Cycle {
        /// A node on the cycle.
        id: ExternalId,
    },

    /// Two siblings share an ordinal position.
    #[error("position {position} used twice under {}", .parent.as_ref().map_or("<root>", |p| p.as_str()))]
    DuplicatePosition {
        /// The shared parent (`None` for top-level).
        parent: Option<ExternalId>,
        /// The repeated position.
        position: u32,
    },

    /// An operation targets a node that does not exist.
    #[error("node {id} not found")]
    UnknownNode {
        /// The missing node.
        id: ExternalId,
    },

    /// An operation adds a node that already exists.
    #[error("node {id} already exists")]
    NodeExists {
        /// The existing node.
        id: ExternalId,
    },

    /// The source snapshot could not be decoded.
    #[error("malformed outline: {0}")]
    MalformedOutline(String),
}

fn describe_parent(parent: &Option<ExternalId>, parent_kind: &Option<NodeKind>) -> String {
    match (parent, parent_kind) {
        (Some(parent), Some(kind)) => format!("{kind} {parent}"),
        (Some(parent), None) => parent.to_string(),
        (None, _) => "the course root".to_string(),
    }
}

impl StructuralError {
    /// Returns the node the error is about, when there is one.
    #[must_use]
    pub fn node(&self) -> Option<&ExternalId> {
        match self {
            StructuralError::DuplicateId { id }
            | StructuralError::MissingParent { id, .. }
            | StructuralError::InvalidParent { id, .. }
            | StructuralError::Cycle { id }
            | StructuralError::UnknownNode { id }
            | StructuralError::NodeExists { id } => Some(id),
            _ => None,
        }
    }
}
