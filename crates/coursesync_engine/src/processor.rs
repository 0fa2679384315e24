//! Transactional application of change operations.

use crate::relinker::{MasteryRelinker, RelinkSummary};
use coursesync_model::{ChangeOperation, CourseId, ExternalId, RemovalPolicy, TreeNode};
use coursesync_storage::{
    Clock, CourseStore, CourseTransaction, Deadline, NodeUpdate, StoreError, StoreResult,
    StoredNode, SystemClock,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A batch of operations together with the record state it was computed
/// against.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Operations, in application order.
    pub operations: Vec<ChangeOperation>,
    /// Course title to store if it differs from the stored one.
    pub title: Option<String>,
    /// Store revision the operations were computed from.
    pub base_revision: Option<u64>,
}

impl ChangeSet {
    /// Creates a change set from operations.
    pub fn new(operations: Vec<ChangeOperation>) -> Self {
        Self {
            operations,
            ..Self::default()
        }
    }

    /// Also stores `title` as the course title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Refuses to commit unless the course is still at `revision`.
    #[must_use]
    pub fn based_on(mut self, revision: u64) -> Self {
        self.base_revision = Some(revision);
        self
    }

    /// Returns true if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.title.is_none()
    }
}

/// Result of applying a batch of operations.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Every operation was applied and committed.
    Applied {
        /// Number of operations applied.
        op_count: usize,
        /// Mastery records touched.
        relink: RelinkSummary,
        /// Whether the stored course title changed.
        title_updated: bool,
    },
    /// Nothing was committed.
    Failed {
        /// Why the batch failed.
        reason: StoreError,
        /// Operations left applied; always zero.
        partial_progress: usize,
    },
}

impl ApplyOutcome {
    /// Returns true if the batch was committed.
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Applies change operations to the persisted hierarchy as one unit.
///
/// Operations are applied in the order given. After each operation the
/// [`MasteryRelinker`] reconciles dependent records inside the same
/// transaction. The final hierarchy is validated before commit; intermediate
/// states may be transiently invalid (for example while two siblings swap
/// positions).
#[derive(Debug)]
pub struct ChangeProcessor {
    relinker: MasteryRelinker,
}

impl ChangeProcessor {
    /// Creates a processor retiring mastery records per `policy`.
    pub fn new(policy: RemovalPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Creates a processor that stamps archived records using `clock`.
    pub fn with_clock(policy: RemovalPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            relinker: MasteryRelinker::new(policy, clock),
        }
    }

    /// Returns the mastery removal policy.
    pub fn removal_policy(&self) -> RemovalPolicy {
        self.relinker.policy()
    }

    /// Applies `ops` to a course in one transaction.
    pub fn apply<S: CourseStore>(
        &self,
        store: &S,
        course: &CourseId,
        ops: &[ChangeOperation],
        deadline: Deadline,
    ) -> ApplyOutcome {
        self.apply_change_set(store, course, &ChangeSet::new(ops.to_vec()), deadline)
    }

    /// Applies a change set to a course in one transaction.
    ///
    /// A change set with a base revision fails with [`StoreError::Stale`]
    /// if another transaction committed since that revision was read.
    pub fn apply_change_set<S: CourseStore>(
        &self,
        store: &S,
        course: &CourseId,
        change: &ChangeSet,
        deadline: Deadline,
    ) -> ApplyOutcome {
        if change.is_empty() {
            return ApplyOutcome::Applied {
                op_count: 0,
                relink: RelinkSummary::default(),
                title_updated: false,
            };
        }

        let ops = &change.operations;
        let result = store.transaction(course, deadline, |txn| {
            if let Some(expected) = change.base_revision {
                let found = txn.base_revision();
                if found != expected {
                    return Err(StoreError::Stale { expected, found });
                }
            }

            let mut relink = RelinkSummary::default();
            let mut preserved = HashSet::new();
            for (index, op) in ops.iter().enumerate() {
                let removed = apply_op(txn, op)?;
                // A node renamed and moved in one batch keeps its records once.
                if op.kind().priority_rank() != 1 || preserved.insert(op.external_id()) {
                    relink.merge(self.relinker.after_op(txn, op, removed.as_ref())?);
                }
                debug!(course_id = %course, index, op = %op, "operation applied");
            }

            let mut title_updated = false;
            if let Some(title) = &change.title {
                if txn.title()?.as_ref() != Some(title) {
                    txn.set_title(Some(title.clone()))?;
                    title_updated = true;
                }
            }

            txn.tree()?;
            Ok((relink, title_updated))
        });

        match result {
            Ok((relink, title_updated)) => {
                info!(
                    course_id = %course,
                    op_count = ops.len(),
                    preserved = relink.preserved,
                    retired = relink.retired,
                    title_updated,
                    "change set committed"
                );
                ApplyOutcome::Applied {
                    op_count: ops.len(),
                    relink,
                    title_updated,
                }
            }
            Err(reason) => {
                warn!(course_id = %course, error = %reason, "change set rolled back");
                ApplyOutcome::Failed {
                    reason,
                    partial_progress: 0,
                }
            }
        }
    }
}

/// Dispatches an operation to its handler.
///
/// Returns the stored node for removals.
fn apply_op(
    txn: &mut dyn CourseTransaction,
    op: &ChangeOperation,
) -> StoreResult<Option<StoredNode>> {
    match op {
        ChangeOperation::Add { node } => add_node(txn, node).map(|()| None),
        ChangeOperation::Remove { node } => remove_node(txn, &node.external_id).map(Some),
        ChangeOperation::Rename { id, to, .. } => rename_node(txn, id, to).map(|()| None),
        ChangeOperation::Move {
            id,
            to_parent,
            to_position,
            ..
        } => move_node(txn, id, to_parent.clone(), *to_position).map(|()| None),
        ChangeOperation::ContentUpdate { id, to, .. } => {
            update_content(txn, id, to.clone()).map(|()| None)
        }
        ChangeOperation::Reorder { id, to, .. } => reorder_node(txn, id, *to).map(|()| None),
    }
}

fn add_node(txn: &mut dyn CourseTransaction, node: &TreeNode) -> StoreResult<()> {
    txn.insert_node(node.clone())?;
    Ok(())
}

fn remove_node(txn: &mut dyn CourseTransaction, id: &ExternalId) -> StoreResult<StoredNode> {
    txn.remove_node(id)
}

fn rename_node(txn: &mut dyn CourseTransaction, id: &ExternalId, to: &str) -> StoreResult<()> {
    txn.update_node(id, NodeUpdate::DisplayName(to.to_string()))
}

fn move_node(
    txn: &mut dyn CourseTransaction,
    id: &ExternalId,
    parent: Option<ExternalId>,
    position: u32,
) -> StoreResult<()> {
    txn.update_node(id, NodeUpdate::Parent { parent, position })
}

fn update_content(
    txn: &mut dyn CourseTransaction,
    id: &ExternalId,
    content: serde_json::Value,
) -> StoreResult<()> {
    txn.update_node(id, NodeUpdate::Content(content))
}

fn reorder_node(
    txn: &mut dyn CourseTransaction,
    id: &ExternalId,
    position: u32,
) -> StoreResult<()> {
    txn.update_node(id, NodeUpdate::Position(position))
}
