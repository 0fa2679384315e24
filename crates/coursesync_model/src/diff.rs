//! Diff engine.
//!
//! Compares two [`CourseTree`] snapshots and produces the ordered list of
//! [`ChangeOperation`]s that turns the old tree into the new one.
//!
//! ## Detectors
//!
//! The diff is the concatenation of a fixed list of pure detectors:
//!
//! 1. removed nodes (in old, not in new) → `Remove`
//! 2. added nodes (in new, not in old) → `Add`
//! 3. preserved nodes (in both) → `Rename`, `Move`, `ContentUpdate`, `Reorder`
//!
//! A node that keeps its external ID but changes kind is replaced: it counts
//! as removed from the old tree and added to the new one.
//!
//! ## Ordering
//!
//! The output is sorted by `(priority_rank, external_id)`:
//! `Add` < `Rename`/`Move`/`ContentUpdate`/`Reorder` < `Remove`.
//! Additions are additionally ordered by depth so a parent is always added
//! before its children. Removals of replaced nodes come first of all, so the
//! ID is free again when its replacement is added. Operations on the same
//! node are adjacent, in [`OperationKind`] order. The same input always
//! yields the same output.

use crate::error::ModelResult;
use crate::node::TreeNode;
use crate::operation::{ChangeOperation, OperationKind};
use crate::tree::CourseTree;
use crate::ExternalId;
use std::collections::HashSet;
use tracing::debug;

type Detector = fn(&CourseTree, &CourseTree) -> Vec<ChangeOperation>;

const DETECTORS: [Detector; 3] = [removed_nodes, added_nodes, preserved_nodes];

/// Computes the operations that transform `old` into `new`.
///
/// Both trees are already validated, so every pair of trees has a change
/// set; the result type matches [`diff_snapshots`].
pub fn diff(old: &CourseTree, new: &CourseTree) -> ModelResult<Vec<ChangeOperation>> {
    let replaced = replaced_ids(old, new);

    let mut ops: Vec<ChangeOperation> = DETECTORS
        .iter()
        .flat_map(|detect| detect(old, new))
        .collect();
    ops.sort_by(|a, b| sort_key(a, &replaced).cmp(&sort_key(b, &replaced)));

    debug!(
        old_nodes = old.len(),
        new_nodes = new.len(),
        replaced = replaced.len(),
        op_count = ops.len(),
        "diff computed"
    );
    Ok(ops)
}

/// Builds both snapshots from flat node lists, then diffs them.
///
/// # Errors
///
/// Returns the first [`StructuralError`](crate::StructuralError) found in
/// either snapshot.
pub fn diff_snapshots(
    old: impl IntoIterator<Item = TreeNode>,
    new: impl IntoIterator<Item = TreeNode>,
) -> ModelResult<Vec<ChangeOperation>> {
    let old = CourseTree::build(old)?;
    let new = CourseTree::build(new)?;
    diff(&old, &new)
}

/// Orders replaced-node removals first, then by priority rank.
fn sort_key<'a>(
    op: &'a ChangeOperation,
    replaced: &HashSet<&ExternalId>,
) -> (u8, u8, &'a ExternalId, OperationKind) {
    let kind = op.kind();
    let id = op.external_id();
    let phase = if kind == OperationKind::Remove && replaced.contains(id) {
        0
    } else {
        kind.priority_rank() + 1
    };
    let depth = if kind == OperationKind::Add {
        op.node_kind().depth()
    } else {
        0
    };
    (phase, depth, id, kind)
}

/// IDs present in both trees with different kinds.
fn replaced_ids<'a>(old: &CourseTree, new: &'a CourseTree) -> HashSet<&'a ExternalId> {
    new.nodes()
        .filter(|node| !kept_as_same_kind(node, old) && old.contains(&node.external_id))
        .map(|node| &node.external_id)
        .collect()
}

fn kept_as_same_kind(node: &TreeNode, other: &CourseTree) -> bool {
    other
        .get(&node.external_id)
        .is_some_and(|counterpart| counterpart.kind == node.kind)
}

fn removed_nodes(old: &CourseTree, new: &CourseTree) -> Vec<ChangeOperation> {
    old.nodes()
        .filter(|node| !kept_as_same_kind(node, new))
        .map(|node| ChangeOperation::Remove { node: node.clone() })
        .collect()
}

fn added_nodes(old: &CourseTree, new: &CourseTree) -> Vec<ChangeOperation> {
    new.depth_first()
        .filter(|node| !kept_as_same_kind(node, old))
        .map(|node| ChangeOperation::Add { node: node.clone() })
        .collect()
}

fn preserved_nodes(old: &CourseTree, new: &CourseTree) -> Vec<ChangeOperation> {
    let mut ops = Vec::new();
    for after in new.nodes() {
        let Some(before) = old.get(&after.external_id) else {
            continue;
        };
        if before.kind != after.kind {
            continue;
        }
        let id = &after.external_id;

        if before.display_name != after.display_name {
            ops.push(ChangeOperation::Rename {
                id: id.clone(),
                kind: after.kind,
                from: before.display_name.clone(),
                to: after.display_name.clone(),
            });
        }

        if before.parent != after.parent {
            ops.push(ChangeOperation::Move {
                id: id.clone(),
                kind: after.kind,
                from_parent: before.parent.clone(),
                to_parent: after.parent.clone(),
                from_position: before.position,
                to_position: after.position,
            });
        } else if before.position != after.position {
            ops.push(ChangeOperation::Reorder {
                id: id.clone(),
                kind: after.kind,
                from: before.position,
                to: after.position,
            });
        }

        if before.content != after.content {
            ops.push(ChangeOperation::ContentUpdate {
                id: id.clone(),
                kind: after.kind,
                from: before.content.clone(),
                to: after.content.clone(),
            });
        }
    }
    ops
}
