//! In-memory course store.

use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};
use crate::record::{CourseRecord, FaultPlan, RecordTransaction};
use crate::store::{CourseStore, CourseTransaction};
use coursesync_model::{ArchivedMastery, CourseId, CourseTree, ExternalId, TopicMastery};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Time bound for calls made outside a sync run.
const LEDGER_TIMEOUT: Duration = Duration::from_secs(30);

/// A course store that keeps everything in memory.
///
/// Suitable for tests and for a single process that re-syncs on start.
///
/// # Concurrency
///
/// Each course has its own writer lock; a transaction waits for it at most
/// until its deadline and then fails with [`StoreError::Contention`].
/// Readers never observe a transaction's working copy.
#[derive(Debug, Default)]
pub struct MemoryCourseStore {
    courses: RwLock<HashMap<CourseId, CourseRecord>>,
    writers: Mutex<HashMap<CourseId, Arc<Mutex<()>>>>,
    faults: Mutex<FaultPlan>,
}

impl MemoryCourseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects faults into the next transaction only.
    pub fn inject_faults(&self, plan: FaultPlan) {
        *self.faults.lock() = plan;
    }

    /// Returns a copy of a course's persisted record.
    #[must_use]
    pub fn record(&self, course: &CourseId) -> Option<CourseRecord> {
        self.courses.read().get(course).cloned()
    }

    fn writer(&self, course: &CourseId) -> Arc<Mutex<()>> {
        Arc::clone(self.writers.lock().entry(course.clone()).or_default())
    }

    /// Runs `f` on a working copy under the course's writer lock and swaps
    /// the copy in if everything succeeds.
    ///
    /// Injected faults are taken only once the lock is held.
    fn commit<T>(
        &self,
        course: &CourseId,
        deadline: Deadline,
        inject: bool,
        f: impl FnOnce(&mut RecordTransaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let writer = self.writer(course);
        let _guard = writer
            .try_lock_for(deadline.remaining())
            .ok_or_else(|| StoreError::Contention(format!("course {course} is being written")))?;

        let faults = if inject {
            std::mem::take(&mut *self.faults.lock())
        } else {
            FaultPlan::default()
        };
        let working = self.record(course).unwrap_or_default();
        let mut txn = RecordTransaction::with_faults(course, working, deadline, faults);

        let value = f(&mut txn)?;
        let record = txn.into_record()?;
        let revision = record.revision;
        self.courses.write().insert(course.clone(), record);

        debug!(course_id = %course, revision, "memory transaction committed");
        Ok(value)
    }

    fn read<T>(
        &self,
        course: &CourseId,
        deadline: Deadline,
        f: impl FnOnce(Option<&CourseRecord>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let courses = self
            .courses
            .try_read_for(deadline.remaining())
            .ok_or(StoreError::Timeout {
                limit: deadline.limit(),
            })?;
        f(courses.get(course))
    }
}

impl CourseStore for MemoryCourseStore {
    fn load_tree(&self, course: &CourseId, deadline: Deadline) -> StoreResult<CourseTree> {
        self.read(course, deadline, |record| match record {
            Some(record) => record.tree(),
            None => Ok(CourseTree::empty()),
        })
    }

    fn load_title(&self, course: &CourseId, deadline: Deadline) -> StoreResult<Option<String>> {
        self.read(course, deadline, |record| {
            Ok(record.and_then(|r| r.title.clone()))
        })
    }

    fn transaction<T, F>(&self, course: &CourseId, deadline: Deadline, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn CourseTransaction) -> StoreResult<T>,
    {
        self.commit(course, deadline, true, |txn| f(txn))
    }

    fn record_mastery(&self, course: &CourseId, record: TopicMastery) -> StoreResult<()> {
        self.commit(course, Deadline::after(LEDGER_TIMEOUT), false, |txn| {
            txn.upsert_mastery(record)
        })
    }

    fn masteries_for_topic(
        &self,
        course: &CourseId,
        topic: &ExternalId,
    ) -> StoreResult<Vec<TopicMastery>> {
        self.read(course, Deadline::after(LEDGER_TIMEOUT), |record| {
            Ok(record.map(|r| r.masteries_for_topic(topic)).unwrap_or_default())
        })
    }

    fn archived_masteries(&self, course: &CourseId) -> StoreResult<Vec<ArchivedMastery>> {
        self.read(course, Deadline::after(LEDGER_TIMEOUT), |record| {
            Ok(record.map(|r| r.archived.clone()).unwrap_or_default())
        })
    }

    fn revision(&self, course: &CourseId) -> StoreResult<u64> {
        self.read(course, Deadline::after(LEDGER_TIMEOUT), |record| {
            Ok(record.map_or(0, |r| r.revision))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NodeUpdate;
    use coursesync_model::{MasteryStatus, TreeNode};
    use std::thread;

    fn course() -> CourseId {
        CourseId::new("course-1")
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    fn seed(store: &MemoryCourseStore) {
        store
            .transaction(&course(), deadline(), |txn| {
                txn.insert_node(TreeNode::category("C1", "Maths", 0))?;
                txn.insert_node(TreeNode::topic("T1", "C1", "Algebra", 0))?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn unknown_course_is_empty() {
        let store = MemoryCourseStore::new();
        let tree = store.load_tree(&course(), deadline()).unwrap();
        assert!(tree.is_empty());
        assert_eq!(store.revision(&course()).unwrap(), 0);
    }

    #[test]
    fn committed_transaction_is_visible() {
        let store = MemoryCourseStore::new();
        seed(&store);

        let tree = store.load_tree(&course(), deadline()).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(store.revision(&course()).unwrap(), 1);
    }

    #[test]
    fn failed_transaction_leaves_nothing() {
        let store = MemoryCourseStore::new();
        seed(&store);
        let before = store.load_tree(&course(), deadline()).unwrap().fingerprint();

        store.inject_faults(FaultPlan::fail_on_write(1));
        let err = store
            .transaction(&course(), deadline(), |txn| {
                txn.update_node(
                    &ExternalId::new("T1"),
                    NodeUpdate::DisplayName("Algebra I".into()),
                )?;
                txn.insert_node(TreeNode::topic("T2", "C1", "Algebra II", 1))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));

        let after = store.load_tree(&course(), deadline()).unwrap();
        assert_eq!(after.fingerprint(), before);
        assert_eq!(store.revision(&course()).unwrap(), 1);
    }

    #[test]
    fn faults_apply_to_one_transaction() {
        let store = MemoryCourseStore::new();
        store.inject_faults(FaultPlan::fail_on_write(0));
        let first = store.transaction(&course(), deadline(), |txn| {
            txn.insert_node(TreeNode::category("C1", "Maths", 0))
        });
        assert!(first.is_err());
        seed(&store);
        assert_eq!(store.load_tree(&course(), deadline()).unwrap().len(), 2);
    }

    #[test]
    fn faults_survive_contention() {
        let store = Arc::new(MemoryCourseStore::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let holder = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .transaction(&course(), deadline(), |txn| {
                        entered_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        txn.insert_node(TreeNode::category("C1", "Maths", 0))
                    })
                    .unwrap();
            })
        };

        entered_rx.recv().unwrap();
        store.inject_faults(FaultPlan::fail_on_write(0));
        let err = store
            .transaction(&course(), Deadline::after(Duration::from_millis(20)), |txn| {
                txn.insert_node(TreeNode::category("C2", "Science", 1))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Contention(_)));

        release_tx.send(()).unwrap();
        holder.join().unwrap();

        // The plan was not spent by the contended attempt.
        let err = store
            .transaction(&course(), deadline(), |txn| {
                txn.insert_node(TreeNode::category("C2", "Science", 1))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Injected(_)));
        assert_eq!(store.load_tree(&course(), deadline()).unwrap().len(), 1);
    }

    #[test]
    fn title_is_stored_with_the_hierarchy() {
        let store = MemoryCourseStore::new();
        assert_eq!(store.load_title(&course(), deadline()).unwrap(), None);
        store
            .transaction(&course(), deadline(), |txn| {
                assert_eq!(txn.base_revision(), 0);
                txn.set_title(Some("Mathematics".to_string()))
            })
            .unwrap();
        assert_eq!(
            store.load_title(&course(), deadline()).unwrap().as_deref(),
            Some("Mathematics")
        );
        store
            .transaction(&course(), deadline(), |txn| {
                assert_eq!(txn.base_revision(), 1);
                assert_eq!(txn.title()?.as_deref(), Some("Mathematics"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn invalid_tree_is_rejected_by_validation() {
        let store = MemoryCourseStore::new();
        let err = store
            .transaction(&course(), deadline(), |txn| {
                txn.insert_node(TreeNode::topic("T1", "C9", "Orphan", 0))?;
                txn.tree()?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Structural(_)));
        assert!(store.record(&course()).is_none());
    }

    #[test]
    fn stalled_writes_time_out() {
        let store = MemoryCourseStore::new();
        store.inject_faults(FaultPlan::stall(Duration::from_millis(30)));
        let err = store
            .transaction(&course(), Deadline::after(Duration::from_millis(20)), |txn| {
                txn.insert_node(TreeNode::category("C1", "Maths", 0))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(store.record(&course()).is_none());
    }

    #[test]
    fn concurrent_writer_gets_contention() {
        let store = Arc::new(MemoryCourseStore::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let holder = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .transaction(&course(), deadline(), |txn| {
                        entered_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        txn.insert_node(TreeNode::category("C1", "Maths", 0))
                    })
                    .unwrap();
            })
        };

        entered_rx.recv().unwrap();
        let err = store
            .transaction(&course(), Deadline::after(Duration::from_millis(20)), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Contention(_)));

        // Readers still see the last committed state.
        assert!(store.load_tree(&course(), deadline()).unwrap().is_empty());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert_eq!(store.load_tree(&course(), deadline()).unwrap().len(), 1);
    }

    #[test]
    fn mastery_ledger_round_trip() {
        let store = MemoryCourseStore::new();
        seed(&store);
        store
            .record_mastery(
                &course(),
                TopicMastery::new("u1", "T1", MasteryStatus::InProgress),
            )
            .unwrap();
        store
            .record_mastery(&course(), TopicMastery::new("u1", "T1", MasteryStatus::Mastered))
            .unwrap();

        let records = store
            .masteries_for_topic(&course(), &ExternalId::new("T1"))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, MasteryStatus::Mastered);
        assert!(store.archived_masteries(&course()).unwrap().is_empty());
    }
}
