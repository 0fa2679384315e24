//! Test fixtures and store helpers.
//!
//! Provides sample course trees and convenience functions for setting up
//! seeded stores.

use coursesync_model::{
    CourseId, CourseTree, MasteryStatus, TopicMastery, TreeNode,
};
use coursesync_storage::{CourseStore, Deadline, FileCourseStore, MemoryCourseStore};
use std::time::Duration;
use tempfile::TempDir;

/// Course ID used by fixtures.
pub const FIXTURE_COURSE: &str = "course-v1:Org+MATH+2024";

/// Returns the fixture course ID.
pub fn fixture_course() -> CourseId {
    CourseId::new(FIXTURE_COURSE)
}

/// A generous deadline for test storage calls.
pub fn test_deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
}

/// `C1 → T1("Algebra", 0)`.
pub fn algebra_before() -> CourseTree {
    CourseTree::build(algebra_before_nodes()).expect("fixture tree is valid")
}

/// Nodes of [`algebra_before`].
pub fn algebra_before_nodes() -> Vec<TreeNode> {
    vec![
        TreeNode::category("C1", "Mathematics", 0),
        TreeNode::topic("T1", "C1", "Algebra", 0),
    ]
}

/// `C1 → T1("Algebra I", 0), T2("Algebra II", 1)`.
pub fn algebra_after() -> CourseTree {
    CourseTree::build(algebra_after_nodes()).expect("fixture tree is valid")
}

/// Nodes of [`algebra_after`].
pub fn algebra_after_nodes() -> Vec<TreeNode> {
    vec![
        TreeNode::category("C1", "Mathematics", 0),
        TreeNode::topic("T1", "C1", "Algebra I", 0),
        TreeNode::topic("T2", "C1", "Algebra II", 1),
    ]
}

/// A two-category course with subtopics.
pub fn form_one_course() -> CourseTree {
    CourseTree::build(vec![
        TreeNode::category("C1", "Mathematics", 0),
        TreeNode::category("C2", "Science", 1),
        TreeNode::topic("T1", "C1", "Algebra", 0),
        TreeNode::topic("T2", "C1", "Geometry", 1),
        TreeNode::topic("T3", "C2", "Physics", 0),
        TreeNode::subtopic("S1", "T1", "Like terms", 0),
        TreeNode::subtopic("S2", "T1", "Brackets", 1),
        TreeNode::subtopic("S3", "T3", "Motion", 0),
    ])
    .expect("fixture tree is valid")
}

/// Mastery records for `users` learners on a topic, alternating statuses.
pub fn sample_masteries(topic: &str, users: usize) -> Vec<TopicMastery> {
    const STATUSES: [MasteryStatus; 3] = [
        MasteryStatus::NotStarted,
        MasteryStatus::InProgress,
        MasteryStatus::Mastered,
    ];
    (0..users)
        .map(|i| TopicMastery::new(format!("user-{i}").as_str(), topic, STATUSES[i % 3]))
        .collect()
}

/// Writes `tree` into `store` as the course's persisted hierarchy.
///
/// Nodes are inserted parents first. The store must not already hold the
/// course.
pub fn seed_store<S: CourseStore>(store: &S, course: &CourseId, tree: &CourseTree) {
    store
        .transaction(course, test_deadline(), |txn| {
            for node in tree.depth_first() {
                txn.insert_node(node.clone())?;
            }
            txn.tree()?;
            Ok(())
        })
        .expect("Failed to seed store");
}

/// Creates an in-memory store holding `tree` for the fixture course.
pub fn seeded_memory_store(tree: &CourseTree) -> MemoryCourseStore {
    let store = MemoryCourseStore::new();
    seed_store(&store, &fixture_course(), tree);
    store
}

/// A file store in a temporary directory, removed on drop.
pub struct TestFileStore {
    /// The store.
    pub store: FileCourseStore,
    /// The temporary directory (kept alive to prevent cleanup).
    pub dir: TempDir,
}

impl TestFileStore {
    /// Creates an empty file store.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileCourseStore::open(dir.path()).expect("Failed to open file store");
        Self { store, dir }
    }
}

impl Default for TestFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestFileStore {
    type Target = FileCourseStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary file store.
///
/// # Example
///
/// ```rust
/// use coursesync_testkit::{fixture_course, test_deadline, with_temp_store};
/// use coursesync_storage::CourseStore;
///
/// with_temp_store(|store| {
///     let tree = store.load_tree(&fixture_course(), test_deadline()).unwrap();
///     assert!(tree.is_empty());
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&FileCourseStore) -> R,
{
    let test_store = TestFileStore::new();
    f(&test_store.store)
}
