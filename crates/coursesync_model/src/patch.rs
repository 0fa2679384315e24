//! In-memory application of change operations.

use crate::error::{ModelResult, StructuralError};
use crate::node::{ExternalId, TreeNode};
use crate::operation::ChangeOperation;
use crate::tree::CourseTree;
use std::collections::HashMap;

impl CourseTree {
    /// Applies operations in order and returns the resulting tree.
    ///
    /// Intermediate states are not validated; the hierarchy rules are checked
    /// once all operations have been applied.
    ///
    /// # Errors
    ///
    /// Fails if an operation targets a missing node, adds an existing one, or
    /// the final tree is malformed. `self` is never modified.
    pub fn apply_ops(&self, ops: &[ChangeOperation]) -> ModelResult<CourseTree> {
        let mut nodes: HashMap<ExternalId, TreeNode> = self
            .nodes()
            .map(|node| (node.external_id.clone(), node.clone()))
            .collect();

        for op in ops {
            apply_one(&mut nodes, op)?;
        }

        CourseTree::build(nodes.into_values())
    }
}

fn apply_one(nodes: &mut HashMap<ExternalId, TreeNode>, op: &ChangeOperation) -> ModelResult<()> {
    if let ChangeOperation::Add { node } = op {
        if nodes.contains_key(&node.external_id) {
            return Err(StructuralError::NodeExists {
                id: node.external_id.clone(),
            });
        }
        nodes.insert(node.external_id.clone(), node.clone());
        return Ok(());
    }

    let id = op.external_id();
    if let ChangeOperation::Remove { .. } = op {
        return nodes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StructuralError::UnknownNode { id: id.clone() });
    }

    let target = nodes
        .get_mut(id)
        .ok_or_else(|| StructuralError::UnknownNode { id: id.clone() })?;
    match op {
        ChangeOperation::Rename { to, .. } => target.display_name = to.clone(),
        ChangeOperation::Move {
            to_parent,
            to_position,
            ..
        } => {
            target.parent = to_parent.clone();
            target.position = *to_position;
        }
        ChangeOperation::ContentUpdate { to, .. } => target.content = to.clone(),
        ChangeOperation::Reorder { to, .. } => target.position = *to,
        ChangeOperation::Add { .. } | ChangeOperation::Remove { .. } => {}
    }
    Ok(())
}
