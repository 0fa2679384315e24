//! Change operations.

use crate::node::{ExternalId, NodeKind, TreeNode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a [`ChangeOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A node was created.
    Add,
    /// A node's display name changed.
    Rename,
    /// A node changed parent.
    Move,
    /// A node's content payload changed.
    ContentUpdate,
    /// A node changed position under the same parent.
    Reorder,
    /// A node was deleted.
    Remove,
}

impl OperationKind {
    /// Sorting rank: additions first, removals last.
    #[must_use]
    pub const fn priority_rank(self) -> u8 {
        match self {
            OperationKind::Add => 0,
            OperationKind::Rename
            | OperationKind::Move
            | OperationKind::ContentUpdate
            | OperationKind::Reorder => 1,
            OperationKind::Remove => 2,
        }
    }

    /// Returns true for operations that change the set of nodes.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(self, OperationKind::Add | OperationKind::Remove)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Add => "add",
            OperationKind::Rename => "rename",
            OperationKind::Move => "move",
            OperationKind::ContentUpdate => "content_update",
            OperationKind::Reorder => "reorder",
            OperationKind::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// One delta between two course snapshots.
///
/// Each variant carries both the before and after values it touches, so an
/// operation can be applied or inverted without consulting either tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOperation {
    /// Insert a node.
    Add {
        /// The node as it appears in the new snapshot.
        node: TreeNode,
    },
    /// Delete a node.
    Remove {
        /// The node as it appeared in the old snapshot.
        node: TreeNode,
    },
    /// Change a node's display name.
    Rename {
        /// Target node.
        id: ExternalId,
        /// Target kind.
        kind: NodeKind,
        /// Old name.
        from: String,
        /// New name.
        to: String,
    },
    /// Re-parent a node. The position is the one under the new parent.
    Move {
        /// Target node.
        id: ExternalId,
        /// Target kind.
        kind: NodeKind,
        /// Old parent.
        from_parent: Option<ExternalId>,
        /// New parent.
        to_parent: Option<ExternalId>,
        /// Old position.
        from_position: u32,
        /// New position.
        to_position: u32,
    },
    /// Replace a node's content payload.
    ContentUpdate {
        /// Target node.
        id: ExternalId,
        /// Target kind.
        kind: NodeKind,
        /// Old payload.
        from: serde_json::Value,
        /// New payload.
        to: serde_json::Value,
    },
    /// Change a node's position under an unchanged parent.
    Reorder {
        /// Target node.
        id: ExternalId,
        /// Target kind.
        kind: NodeKind,
        /// Old position.
        from: u32,
        /// New position.
        to: u32,
    },
}

impl ChangeOperation {
    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            ChangeOperation::Add { .. } => OperationKind::Add,
            ChangeOperation::Remove { .. } => OperationKind::Remove,
            ChangeOperation::Rename { .. } => OperationKind::Rename,
            ChangeOperation::Move { .. } => OperationKind::Move,
            ChangeOperation::ContentUpdate { .. } => OperationKind::ContentUpdate,
            ChangeOperation::Reorder { .. } => OperationKind::Reorder,
        }
    }

    /// Returns the external ID of the node the operation targets.
    #[must_use]
    pub fn external_id(&self) -> &ExternalId {
        match self {
            ChangeOperation::Add { node } | ChangeOperation::Remove { node } => &node.external_id,
            ChangeOperation::Rename { id, .. }
            | ChangeOperation::Move { id, .. }
            | ChangeOperation::ContentUpdate { id, .. }
            | ChangeOperation::Reorder { id, .. } => id,
        }
    }

    /// Returns the kind of the targeted node.
    #[must_use]
    pub fn node_kind(&self) -> NodeKind {
        match self {
            ChangeOperation::Add { node } | ChangeOperation::Remove { node } => node.kind,
            ChangeOperation::Rename { kind, .. }
            | ChangeOperation::Move { kind, .. }
            | ChangeOperation::ContentUpdate { kind, .. }
            | ChangeOperation::Reorder { kind, .. } => *kind,
        }
    }

    /// Returns the operation that undoes this one.
    #[must_use]
    pub fn invert(&self) -> ChangeOperation {
        match self.clone() {
            ChangeOperation::Add { node } => ChangeOperation::Remove { node },
            ChangeOperation::Remove { node } => ChangeOperation::Add { node },
            ChangeOperation::Rename { id, kind, from, to } => ChangeOperation::Rename {
                id,
                kind,
                from: to,
                to: from,
            },
            ChangeOperation::Move {
                id,
                kind,
                from_parent,
                to_parent,
                from_position,
                to_position,
            } => ChangeOperation::Move {
                id,
                kind,
                from_parent: to_parent,
                to_parent: from_parent,
                from_position: to_position,
                to_position: from_position,
            },
            ChangeOperation::ContentUpdate { id, kind, from, to } => {
                ChangeOperation::ContentUpdate {
                    id,
                    kind,
                    from: to,
                    to: from,
                }
            }
            ChangeOperation::Reorder { id, kind, from, to } => ChangeOperation::Reorder {
                id,
                kind,
                from: to,
                to: from,
            },
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOperation::Add { node } => write!(
                f,
                "add {} {} \"{}\" at {}",
                node.kind, node.external_id, node.display_name, node.position
            ),
            ChangeOperation::Remove { node } => {
                write!(f, "remove {} {}", node.kind, node.external_id)
            }
            ChangeOperation::Rename { id, kind, from, to } => {
                write!(f, "rename {kind} {id}: \"{from}\" -> \"{to}\"")
            }
            ChangeOperation::Move {
                id,
                kind,
                from_parent,
                to_parent,
                to_position,
                ..
            } => write!(
                f,
                "move {kind} {id}: {} -> {} at {to_position}",
                from_parent.as_ref().map_or("<root>", ExternalId::as_str),
                to_parent.as_ref().map_or("<root>", ExternalId::as_str),
            ),
            ChangeOperation::ContentUpdate { id, kind, .. } => {
                write!(f, "update content of {kind} {id}")
            }
            ChangeOperation::Reorder { id, kind, from, to } => {
                write!(f, "reorder {kind} {id}: {from} -> {to}")
            }
        }
    }
}
