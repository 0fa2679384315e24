//! Integration tests for the sync coordinator against real stores.

use coursesync_engine::{
    DirectorySource, ErrorKind, FetchError, MemorySource, Notification, RetryConfig,
    SnapshotSource, SyncConfig, SyncCoordinator, SyncStatus,
};
use coursesync_model::{
    CourseId, CourseOutline, CourseTree, ExternalId, MasteryStatus, NodeKind, RemovalPolicy,
    TopicMastery, TreeNode,
};
use coursesync_storage::{
    Clock, CourseStore, FaultPlan, FileCourseStore, FileLeaseService, ManualClock,
    MemoryCourseStore, MemoryLeaseService,
};
use coursesync_testkit::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::fs;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

type MemoryCoordinator<F = MemorySource> =
    SyncCoordinator<MemoryCourseStore, MemoryLeaseService, F>;

fn quick_config() -> SyncConfig {
    SyncConfig::new()
        .with_retry(RetryConfig::fixed(3, Duration::ZERO))
        .with_lease_retry(RetryConfig::fixed(3, Duration::ZERO))
}

fn memory_coordinator(config: SyncConfig) -> (MemoryCoordinator, Arc<MemorySource>) {
    let source = Arc::new(MemorySource::new());
    let coordinator = SyncCoordinator::new(
        config,
        Arc::new(MemoryCourseStore::new()),
        Arc::new(MemoryLeaseService::new()),
        Arc::clone(&source),
    );
    (coordinator, source)
}

fn sorted_masteries<S: CourseStore>(store: &S, topic: &str) -> Vec<TopicMastery> {
    let mut records = store
        .masteries_for_topic(&fixture_course(), &ExternalId::new(topic))
        .unwrap();
    records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    records
}

fn record_all<S: CourseStore>(store: &S, records: Vec<TopicMastery>) {
    for record in records {
        store.record_mastery(&fixture_course(), record).unwrap();
    }
}

#[test]
fn algebra_rename_keeps_mastery() {
    let (coordinator, source) = memory_coordinator(quick_config());
    source.publish(&fixture_course(), algebra_before_nodes());
    assert_eq!(
        coordinator.handle(&Notification::new(fixture_course())).status,
        SyncStatus::Applied
    );

    record_all(&**coordinator.store(), sample_masteries("T1", 3));
    let before = sorted_masteries(&**coordinator.store(), "T1");

    source.publish(&fixture_course(), algebra_after_nodes());
    let result = coordinator.handle(&Notification::new(fixture_course()));

    assert_eq!(result.status, SyncStatus::Applied);
    assert_eq!(result.applied_op_count, 2);
    assert_eq!(result.relink.preserved, 3);
    assert_eq!(result.relink.retired, 0);
    assert_eq!(sorted_masteries(&**coordinator.store(), "T1"), before);
    assert!(sorted_masteries(&**coordinator.store(), "T2").is_empty());

    let tree = coordinator
        .store()
        .load_tree(&fixture_course(), test_deadline())
        .unwrap();
    assert_eq!(tree, algebra_after());
}

#[test]
fn move_between_categories_keeps_mastery() {
    let (coordinator, source) = memory_coordinator(quick_config());
    source.publish(&fixture_course(), form_one_course().into_nodes());
    coordinator.handle(&Notification::new(fixture_course()));
    record_all(&**coordinator.store(), sample_masteries("T2", 4));
    let before = sorted_masteries(&**coordinator.store(), "T2");

    // Geometry moves from Mathematics to Science.
    let mut nodes = form_one_course().into_nodes();
    for node in &mut nodes {
        if node.external_id.as_str() == "T2" {
            node.parent = Some(ExternalId::new("C2"));
            node.position = 1;
        }
    }
    source.publish(&fixture_course(), nodes);

    let result = coordinator.handle(&Notification::new(fixture_course()));
    assert_eq!(result.status, SyncStatus::Applied);
    assert_eq!(result.applied_op_count, 1);
    assert_eq!(sorted_masteries(&**coordinator.store(), "T2"), before);

    let tree = coordinator
        .store()
        .load_tree(&fixture_course(), test_deadline())
        .unwrap();
    let science: Vec<&str> = tree
        .children_of(&ExternalId::new("C2"))
        .map(|n| n.external_id.as_str())
        .collect();
    assert_eq!(science, vec!["T3", "T2"]);
}

#[test]
fn removed_topic_records_are_archived() {
    let clock = Arc::new(ManualClock::default());
    let source = Arc::new(MemorySource::new());
    let coordinator = SyncCoordinator::with_clock(
        quick_config(),
        Arc::new(MemoryCourseStore::new()),
        Arc::new(MemoryLeaseService::new()),
        Arc::clone(&source),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    source.publish(&fixture_course(), algebra_after_nodes());
    coordinator.handle(&Notification::new(fixture_course()));
    record_all(&**coordinator.store(), sample_masteries("T2", 2));

    source.publish(&fixture_course(), algebra_before_nodes());
    let result = coordinator.handle(&Notification::new(fixture_course()));

    assert_eq!(result.status, SyncStatus::Applied);
    assert_eq!(result.relink.retired, 2);
    assert!(sorted_masteries(&**coordinator.store(), "T2").is_empty());

    let archived = coordinator
        .store()
        .archived_masteries(&fixture_course())
        .unwrap();
    assert_eq!(archived.len(), 2);
    assert!(archived.iter().all(|a| a.record.topic_id.as_str() == "T2"));
    assert!(archived.iter().all(|a| a.archived_at == clock.now()));
    assert_eq!(coordinator.stats().masteries_retired, 2);
}

#[test]
fn hard_delete_leaves_no_archive() {
    let config = quick_config().with_removal_policy(RemovalPolicy::HardDelete);
    let (coordinator, source) = memory_coordinator(config);
    source.publish(&fixture_course(), algebra_after_nodes());
    coordinator.handle(&Notification::new(fixture_course()));
    record_all(&**coordinator.store(), sample_masteries("T2", 2));

    source.publish(&fixture_course(), algebra_before_nodes());
    let result = coordinator.handle(&Notification::new(fixture_course()));

    assert_eq!(result.relink.retired, 2);
    assert!(sorted_masteries(&**coordinator.store(), "T2").is_empty());
    assert!(coordinator
        .store()
        .archived_masteries(&fixture_course())
        .unwrap()
        .is_empty());
}

#[test]
fn resurrected_topic_starts_without_progress() {
    let (coordinator, source) = memory_coordinator(quick_config());
    source.publish(&fixture_course(), algebra_after_nodes());
    coordinator.handle(&Notification::new(fixture_course()));
    record_all(&**coordinator.store(), sample_masteries("T2", 2));

    source.publish(&fixture_course(), algebra_before_nodes());
    coordinator.handle(&Notification::new(fixture_course()));
    source.publish(&fixture_course(), algebra_after_nodes());
    let result = coordinator.handle(&Notification::new(fixture_course()));

    assert_eq!(result.status, SyncStatus::Applied);
    assert_eq!(result.relink.kept_on_add, 0);
    assert!(sorted_masteries(&**coordinator.store(), "T2").is_empty());
    assert_eq!(
        coordinator
            .store()
            .archived_masteries(&fixture_course())
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn injected_failure_leaves_record_identical() {
    let (coordinator, source) = memory_coordinator(quick_config());
    source.publish(&fixture_course(), form_one_course().into_nodes());
    coordinator.handle(&Notification::new(fixture_course()));
    record_all(&**coordinator.store(), sample_masteries("T3", 3));
    let before = coordinator.store().record(&fixture_course()).unwrap();

    // Physics and its subtopic disappear, Algebra is renamed.
    let nodes: Vec<TreeNode> = form_one_course()
        .into_nodes()
        .into_iter()
        .filter(|n| !matches!(n.external_id.as_str(), "T3" | "S3"))
        .map(|mut n| {
            if n.external_id.as_str() == "T1" {
                n.display_name = "Algebra I".to_string();
            }
            n
        })
        .collect();
    source.publish(&fixture_course(), nodes);
    coordinator
        .store()
        .inject_faults(FaultPlan::fail_on_write(2));

    let failed = coordinator.handle(&Notification::new(fixture_course()));
    assert_eq!(failed.status, SyncStatus::Requeued);
    assert_eq!(failed.error_kind, Some(ErrorKind::TransientStorage));
    assert_eq!(coordinator.store().record(&fixture_course()).unwrap(), before);

    let retried = coordinator.run_until_settled(failed.requeue.unwrap());
    assert_eq!(retried.status, SyncStatus::Applied);
    assert_eq!(retried.applied_op_count, 3);
    assert_eq!(
        coordinator
            .store()
            .archived_masteries(&fixture_course())
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn requeue_cap_aborts_and_keeps_last_hierarchy() {
    let (coordinator, source) = memory_coordinator(quick_config());
    source.publish(&fixture_course(), algebra_before_nodes());
    coordinator.handle(&Notification::new(fixture_course()));

    source.publish(&fixture_course(), algebra_after_nodes());
    source.fail_next(&fixture_course(), 100);
    let result = coordinator.run_until_settled(Notification::new(fixture_course()));

    assert_eq!(result.status, SyncStatus::Aborted);
    assert_eq!(result.error_kind, Some(ErrorKind::RetriesExhausted));
    assert_eq!(coordinator.stats().runs_requeued, 2);
    assert_eq!(
        coordinator
            .store()
            .load_tree(&fixture_course(), test_deadline())
            .unwrap(),
        algebra_before()
    );
}

/// A source whose first fetch blocks until the test opens the gate.
struct GatedSource {
    inner: MemorySource,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl SnapshotSource for GatedSource {
    fn fetch(&self, course: &CourseId) -> Result<CourseOutline, FetchError> {
        if let Some(entered) = self.entered.lock().take() {
            entered.send(()).unwrap();
            self.gate.lock().recv().unwrap();
        }
        self.inner.fetch(course)
    }
}

#[test]
fn duplicate_notification_waits_for_lease() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let source = GatedSource {
        inner: MemorySource::new(),
        entered: Mutex::new(Some(entered_tx)),
        gate: Mutex::new(gate_rx),
    };
    source
        .inner
        .publish(&fixture_course(), algebra_before_nodes());

    let coordinator: Arc<MemoryCoordinator<GatedSource>> = Arc::new(SyncCoordinator::new(
        quick_config(),
        Arc::new(MemoryCourseStore::new()),
        Arc::new(MemoryLeaseService::new()),
        Arc::new(source),
    ));

    let first = {
        let coordinator = Arc::clone(&coordinator);
        thread::spawn(move || coordinator.handle(&Notification::new(fixture_course())))
    };
    entered_rx.recv().unwrap();

    let duplicate = coordinator.handle(&Notification::new(fixture_course()));
    assert_eq!(duplicate.status, SyncStatus::Requeued);
    assert_eq!(duplicate.error_kind, Some(ErrorKind::LeaseContention));
    assert_eq!(duplicate.requeue.as_ref().unwrap().lease_attempts, 1);

    gate_tx.send(()).unwrap();
    assert_eq!(first.join().unwrap().status, SyncStatus::Applied);

    let retried = coordinator.handle(duplicate.requeue.as_ref().unwrap());
    assert_eq!(retried.status, SyncStatus::NoOp);
}

fn write_outline(dir: &std::path::Path, course: &str, topic_name: &str) {
    let doc = json!({
        "course_structure": {
            "display_name": "Form One",
            "child_info": {"children": [
                {"id": "C1", "display_name": "Mathematics", "edited_on": "2024-01-01",
                 "child_info": {"children": [
                    {"id": "T1", "display_name": topic_name, "format": "Homework"}
                 ]}}
            ]}
        }
    });
    let path = DirectorySource::new(dir).outline_path(&CourseId::new(course));
    fs::write(path, doc.to_string()).unwrap();
}

#[test]
fn file_backed_sync_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let outlines = dir.path().join("outlines");
    fs::create_dir_all(&outlines).unwrap();
    write_outline(&outlines, FIXTURE_COURSE, "Algebra");

    let coordinator = SyncCoordinator::new(
        quick_config(),
        Arc::new(FileCourseStore::open(&state).unwrap()),
        Arc::new(FileLeaseService::open(&state).unwrap()),
        Arc::new(DirectorySource::new(&outlines)),
    );

    let first = coordinator.run_until_settled(Notification::new(fixture_course()));
    assert_eq!(first.status, SyncStatus::Applied);
    assert_eq!(first.applied_op_count, 2);
    assert!(first.title_updated);
    record_all(&**coordinator.store(), sample_masteries("T1", 2));

    write_outline(&outlines, FIXTURE_COURSE, "Algebra I");
    let second = coordinator.run_until_settled(Notification::new(fixture_course()));
    assert_eq!(second.status, SyncStatus::Applied);
    assert_eq!(second.applied_op_count, 1);
    assert!(!second.title_updated);
    drop(coordinator);

    let reopened = FileCourseStore::open(&state).unwrap();
    let tree = reopened.load_tree(&fixture_course(), test_deadline()).unwrap();
    let topic = tree.get(&ExternalId::new("T1")).unwrap();
    assert_eq!(topic.kind, NodeKind::Topic);
    assert_eq!(topic.display_name, "Algebra I");
    assert_eq!(
        reopened
            .load_title(&fixture_course(), test_deadline())
            .unwrap()
            .as_deref(),
        Some("Form One")
    );
    assert_eq!(topic.content, json!({"format": "Homework"}));
    assert_eq!(sorted_masteries(&reopened, "T1").len(), 2);
    assert_eq!(
        sorted_masteries(&reopened, "T1")[1].status,
        MasteryStatus::InProgress
    );
}

fn topics(tree: &CourseTree) -> Vec<String> {
    tree.nodes()
        .filter(|n| n.kind == NodeKind::Topic)
        .map(|n| n.external_id.as_str().to_string())
        .collect()
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn sync_reaches_source_and_settles((old, new) in tree_pair_strategy()) {
        let store = Arc::new(seeded_memory_store(&old));
        for topic in topics(&old) {
            let record = TopicMastery::new("learner", topic.as_str(), MasteryStatus::Mastered);
            store.record_mastery(&fixture_course(), record).unwrap();
        }
        let source = Arc::new(MemorySource::new());
        source.publish(&fixture_course(), new.clone().into_nodes());
        let coordinator = SyncCoordinator::new(
            quick_config(),
            Arc::clone(&store),
            Arc::new(MemoryLeaseService::new()),
            source,
        );

        let first = coordinator.handle(&Notification::new(fixture_course()));
        prop_assert!(first.is_success());
        prop_assert_eq!(store.load_tree(&fixture_course(), test_deadline()).unwrap(), new.clone());

        let again = coordinator.handle(&Notification::new(fixture_course()));
        prop_assert_eq!(again.status, SyncStatus::NoOp);

        let kept = topics(&new);
        for topic in topics(&old) {
            let active = sorted_masteries(&*store, &topic).len();
            prop_assert_eq!(active, usize::from(kept.contains(&topic)));
        }
        let removed = topics(&old).iter().filter(|t| !kept.contains(t)).count();
        prop_assert_eq!(store.archived_masteries(&fixture_course()).unwrap().len(), removed);
    }
}
