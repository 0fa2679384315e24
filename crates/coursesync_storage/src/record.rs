//! Course records and the working-copy transaction shared by the stores.

use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};
use crate::store::{CourseTransaction, NodeUpdate, StoredNode, SurrogateId};
use coursesync_model::{
    ArchivedMastery, CourseId, CourseTree, ExternalId, TopicMastery, TreeNode, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Everything persisted for one course.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    /// Persisted nodes by external ID.
    pub nodes: BTreeMap<ExternalId, StoredNode>,
    /// Active mastery records by topic, then user.
    pub masteries: BTreeMap<ExternalId, BTreeMap<UserId, TopicMastery>>,
    /// Retired mastery records.
    pub archived: Vec<ArchivedMastery>,
    /// Course title as last synced.
    #[serde(default)]
    pub title: Option<String>,
    /// Next surrogate to allocate.
    pub next_surrogate: u64,
    /// Number of committed transactions.
    pub revision: u64,
}

impl CourseRecord {
    /// Builds the hierarchy from the persisted nodes.
    pub fn tree(&self) -> StoreResult<CourseTree> {
        Ok(CourseTree::build(
            self.nodes.values().map(|stored| stored.node.clone()),
        )?)
    }

    /// Active records for a topic, ordered by user.
    #[must_use]
    pub fn masteries_for_topic(&self, topic: &ExternalId) -> Vec<TopicMastery> {
        self.masteries
            .get(topic)
            .map(|by_user| by_user.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Creates or replaces a mastery record.
    pub fn upsert_mastery(&mut self, record: TopicMastery) {
        self.masteries
            .entry(record.topic_id.clone())
            .or_default()
            .insert(record.user_id.clone(), record);
    }
}

/// Faults to inject into the next transaction.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Fail the write with this index (0-based).
    pub fail_on_write: Option<usize>,
    /// Sleep this long before every write.
    pub stall_per_write: Option<Duration>,
}

impl FaultPlan {
    /// Fails the `n`th write (0-based).
    #[must_use]
    pub fn fail_on_write(n: usize) -> Self {
        Self {
            fail_on_write: Some(n),
            ..Self::default()
        }
    }

    /// Stalls every write.
    #[must_use]
    pub fn stall(per_write: Duration) -> Self {
        Self {
            stall_per_write: Some(per_write),
            ..Self::default()
        }
    }
}

/// A transaction over a private copy of a [`CourseRecord`].
///
/// The owning store decides whether the copy is committed.
#[derive(Debug)]
pub struct RecordTransaction<'a> {
    course: &'a CourseId,
    record: CourseRecord,
    deadline: Deadline,
    faults: FaultPlan,
    writes: usize,
    base_revision: u64,
}

impl<'a> RecordTransaction<'a> {
    /// Starts a transaction over `record`.
    #[must_use]
    pub fn new(course: &'a CourseId, record: CourseRecord, deadline: Deadline) -> Self {
        Self::with_faults(course, record, deadline, FaultPlan::default())
    }

    /// Starts a transaction that injects `faults`.
    #[must_use]
    pub fn with_faults(
        course: &'a CourseId,
        record: CourseRecord,
        deadline: Deadline,
        faults: FaultPlan,
    ) -> Self {
        Self {
            course,
            base_revision: record.revision,
            record,
            deadline,
            faults,
            writes: 0,
        }
    }

    /// Creates or replaces a mastery record.
    pub fn upsert_mastery(&mut self, record: TopicMastery) -> StoreResult<()> {
        self.before_write()?;
        self.record.upsert_mastery(record);
        Ok(())
    }

    /// Finishes the transaction, returning the record to commit.
    pub fn into_record(self) -> StoreResult<CourseRecord> {
        self.deadline.check()?;
        let mut record = self.record;
        record.revision += 1;
        Ok(record)
    }

    fn before_read(&self) -> StoreResult<()> {
        self.deadline.check()
    }

    fn before_write(&mut self) -> StoreResult<()> {
        if let Some(stall) = self.faults.stall_per_write {
            std::thread::sleep(stall);
        }
        self.deadline.check()?;
        let index = self.writes;
        self.writes += 1;
        if self.faults.fail_on_write == Some(index) {
            return Err(StoreError::Injected(format!(
                "write {index} of course {}",
                self.course
            )));
        }
        Ok(())
    }

    fn stored_mut(&mut self, id: &ExternalId) -> StoreResult<&mut StoredNode> {
        self.record
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound { id: id.clone() })
    }
}

impl CourseTransaction for RecordTransaction<'_> {
    fn course_id(&self) -> &CourseId {
        self.course
    }

    fn base_revision(&self) -> u64 {
        self.base_revision
    }

    fn title(&self) -> StoreResult<Option<String>> {
        self.before_read()?;
        Ok(self.record.title.clone())
    }

    fn set_title(&mut self, title: Option<String>) -> StoreResult<()> {
        self.before_write()?;
        self.record.title = title;
        Ok(())
    }

    fn node(&self, id: &ExternalId) -> StoreResult<Option<StoredNode>> {
        self.before_read()?;
        Ok(self.record.nodes.get(id).cloned())
    }

    fn insert_node(&mut self, node: TreeNode) -> StoreResult<SurrogateId> {
        self.before_write()?;
        if self.record.nodes.contains_key(&node.external_id) {
            return Err(StoreError::NodeExists {
                id: node.external_id,
            });
        }
        let surrogate = SurrogateId(self.record.next_surrogate);
        self.record.next_surrogate += 1;
        self.record
            .nodes
            .insert(node.external_id.clone(), StoredNode { surrogate, node });
        Ok(surrogate)
    }

    fn remove_node(&mut self, id: &ExternalId) -> StoreResult<StoredNode> {
        self.before_write()?;
        self.record
            .nodes
            .remove(id)
            .ok_or_else(|| StoreError::NodeNotFound { id: id.clone() })
    }

    fn update_node(&mut self, id: &ExternalId, update: NodeUpdate) -> StoreResult<()> {
        self.before_write()?;
        let node = &mut self.stored_mut(id)?.node;
        match update {
            NodeUpdate::DisplayName(name) => node.display_name = name,
            NodeUpdate::Parent { parent, position } => {
                node.parent = parent;
                node.position = position;
            }
            NodeUpdate::Content(content) => node.content = content,
            NodeUpdate::Position(position) => node.position = position,
        }
        Ok(())
    }

    fn masteries_for_topic(&self, topic: &ExternalId) -> StoreResult<Vec<TopicMastery>> {
        self.before_read()?;
        Ok(self.record.masteries_for_topic(topic))
    }

    fn delete_masteries(&mut self, topic: &ExternalId) -> StoreResult<usize> {
        self.before_write()?;
        Ok(self
            .record
            .masteries
            .remove(topic)
            .map_or(0, |by_user| by_user.len()))
    }

    fn archive_masteries(
        &mut self,
        topic: &ExternalId,
        node_surrogate: SurrogateId,
        archived_at: SystemTime,
    ) -> StoreResult<usize> {
        self.before_write()?;
        let Some(by_user) = self.record.masteries.remove(topic) else {
            return Ok(0);
        };
        let count = by_user.len();
        self.record
            .archived
            .extend(by_user.into_values().map(|record| ArchivedMastery {
                record,
                node_surrogate: node_surrogate.as_u64(),
                archived_at,
            }));
        Ok(count)
    }

    fn tree(&self) -> StoreResult<CourseTree> {
        self.before_read()?;
        self.record.tree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursesync_model::MasteryStatus;

    fn course() -> CourseId {
        CourseId::new("course-1")
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    #[test]
    fn surrogates_are_never_reused() {
        let course = course();
        let mut txn = RecordTransaction::new(&course, CourseRecord::default(), deadline());
        let first = txn.insert_node(TreeNode::category("C1", "Maths", 0)).unwrap();
        txn.remove_node(&ExternalId::new("C1")).unwrap();
        let second = txn.insert_node(TreeNode::category("C1", "Maths", 0)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn archive_moves_records() {
        let course = course();
        let mut record = CourseRecord::default();
        record.upsert_mastery(TopicMastery::new("u1", "T1", MasteryStatus::Mastered));
        record.upsert_mastery(TopicMastery::new("u2", "T1", MasteryStatus::InProgress));

        let mut txn = RecordTransaction::new(&course, record, deadline());
        let archived = txn
            .archive_masteries(&ExternalId::new("T1"), SurrogateId(4), SystemTime::now())
            .unwrap();
        assert_eq!(archived, 2);
        assert!(txn.masteries_for_topic(&ExternalId::new("T1")).unwrap().is_empty());

        let record = txn.into_record().unwrap();
        assert_eq!(record.archived.len(), 2);
        assert!(record.archived.iter().all(|a| a.node_surrogate == 4));
        assert_eq!(record.revision, 1);
    }

    #[test]
    fn injected_fault_fires_on_requested_write() {
        let course = course();
        let mut txn = RecordTransaction::with_faults(
            &course,
            CourseRecord::default(),
            deadline(),
            FaultPlan::fail_on_write(1),
        );
        txn.insert_node(TreeNode::category("C1", "Maths", 0)).unwrap();
        let err = txn
            .insert_node(TreeNode::category("C2", "Science", 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
    }

    #[test]
    fn update_missing_node_fails() {
        let course = course();
        let mut txn = RecordTransaction::new(&course, CourseRecord::default(), deadline());
        let err = txn
            .update_node(&ExternalId::new("T9"), NodeUpdate::Position(2))
            .unwrap_err();
        assert!(matches!(err, StoreError::NodeNotFound { .. }));
    }

    #[test]
    fn expired_deadline_blocks_commit() {
        let course = course();
        let txn = RecordTransaction::new(
            &course,
            CourseRecord::default(),
            Deadline::after(Duration::ZERO),
        );
        assert!(matches!(txn.into_record(), Err(StoreError::Timeout { .. })));
    }
}
