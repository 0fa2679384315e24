//! Reconciliation of mastery records with structural changes.
//!
//! Mastery records are keyed by the topic's external ID, so renames, moves
//! and reorders need no data changes: the records stay attached. Only a
//! genuine removal retires them, according to the [`RemovalPolicy`]. The
//! re-linker never creates records.

use coursesync_model::{ChangeOperation, RemovalPolicy};
use coursesync_storage::{Clock, CourseTransaction, StoreResult, StoredNode};
use std::sync::Arc;
use tracing::debug;

/// Counts of mastery records touched by one apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelinkSummary {
    /// Records that stayed attached across a rename, move, reorder or
    /// content update.
    pub preserved: usize,
    /// Records archived or deleted because their topic was removed.
    pub retired: usize,
    /// Records that already existed for a newly added node and were left
    /// untouched.
    pub kept_on_add: usize,
}

impl RelinkSummary {
    /// Adds another summary's counts to this one.
    pub fn merge(&mut self, other: RelinkSummary) {
        self.preserved += other.preserved;
        self.retired += other.retired;
        self.kept_on_add += other.kept_on_add;
    }
}

/// Applies the mastery side of each structural change.
pub struct MasteryRelinker {
    policy: RemovalPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MasteryRelinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasteryRelinker")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MasteryRelinker {
    /// Creates a re-linker retiring records per `policy`.
    pub fn new(policy: RemovalPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    /// Returns the removal policy.
    pub fn policy(&self) -> RemovalPolicy {
        self.policy
    }

    /// Reconciles records after `op` has been applied.
    ///
    /// For a removal, `removed` is the node as it was stored; its surrogate
    /// becomes the lineage of archived records.
    pub fn after_op(
        &self,
        txn: &mut dyn CourseTransaction,
        op: &ChangeOperation,
        removed: Option<&StoredNode>,
    ) -> StoreResult<RelinkSummary> {
        let id = op.external_id();
        let mut summary = RelinkSummary::default();

        match op {
            ChangeOperation::Add { .. } => {
                summary.kept_on_add = txn.masteries_for_topic(id)?.len();
                if summary.kept_on_add > 0 {
                    debug!(
                        node = %id,
                        records = summary.kept_on_add,
                        "records already present for added node"
                    );
                }
            }
            ChangeOperation::Remove { .. } => {
                summary.retired = match (self.policy, removed) {
                    (RemovalPolicy::Archive, Some(stored)) => {
                        txn.archive_masteries(id, stored.surrogate, self.clock.now())?
                    }
                    // Nothing to trace lineage to, so nothing to archive under.
                    (RemovalPolicy::Archive, None) | (RemovalPolicy::HardDelete, _) => {
                        txn.delete_masteries(id)?
                    }
                };
                if summary.retired > 0 {
                    debug!(
                        node = %id,
                        records = summary.retired,
                        policy = ?self.policy,
                        "records retired"
                    );
                }
            }
            ChangeOperation::Rename { .. }
            | ChangeOperation::Move { .. }
            | ChangeOperation::ContentUpdate { .. }
            | ChangeOperation::Reorder { .. } => {
                summary.preserved = txn.masteries_for_topic(id)?.len();
            }
        }

        Ok(summary)
    }
}
