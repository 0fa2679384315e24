//! The persistence interface.

use crate::deadline::Deadline;
use crate::error::StoreResult;
use coursesync_model::{
    ArchivedMastery, CourseId, CourseTree, ExternalId, TopicMastery, TreeNode,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Storage identity of a persisted node.
///
/// Surrogates are allocated monotonically per course and never reused, so a
/// node re-added under a previously removed external ID gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurrogateId(pub u64);

impl SurrogateId {
    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurrogateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// A node as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    /// Storage identity.
    pub surrogate: SurrogateId,
    /// Node fields.
    pub node: TreeNode,
}

/// A single-field change to a persisted node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpdate {
    /// Replace the display name.
    DisplayName(String),
    /// Re-parent the node at a position under the new parent.
    Parent {
        /// New parent.
        parent: Option<ExternalId>,
        /// Position under the new parent.
        position: u32,
    },
    /// Replace the content payload.
    Content(serde_json::Value),
    /// Change the position under the current parent.
    Position(u32),
}

/// Mutations available inside a course transaction.
///
/// Nothing written through a transaction is visible to readers until the
/// enclosing [`CourseStore::transaction`] call returns `Ok`. Intermediate
/// states are not checked against the hierarchy rules; call
/// [`CourseTransaction::tree`] to validate the working state.
pub trait CourseTransaction {
    /// The course being modified.
    fn course_id(&self) -> &CourseId;

    /// Revision of the committed record this transaction started from.
    fn base_revision(&self) -> u64;

    /// The course title in the working state.
    fn title(&self) -> StoreResult<Option<String>>;

    /// Replaces the course title.
    fn set_title(&mut self, title: Option<String>) -> StoreResult<()>;

    /// Reads a node.
    fn node(&self, id: &ExternalId) -> StoreResult<Option<StoredNode>>;

    /// Inserts a new node and allocates its surrogate.
    fn insert_node(&mut self, node: TreeNode) -> StoreResult<SurrogateId>;

    /// Removes a node, returning what was stored.
    fn remove_node(&mut self, id: &ExternalId) -> StoreResult<StoredNode>;

    /// Changes one field of a node.
    fn update_node(&mut self, id: &ExternalId, update: NodeUpdate) -> StoreResult<()>;

    /// Active mastery records for a topic.
    fn masteries_for_topic(&self, topic: &ExternalId) -> StoreResult<Vec<TopicMastery>>;

    /// Permanently deletes a topic's active mastery records.
    fn delete_masteries(&mut self, topic: &ExternalId) -> StoreResult<usize>;

    /// Moves a topic's active mastery records to the archive.
    fn archive_masteries(
        &mut self,
        topic: &ExternalId,
        node_surrogate: SurrogateId,
        archived_at: SystemTime,
    ) -> StoreResult<usize>;

    /// Validates and returns the working hierarchy.
    fn tree(&self) -> StoreResult<CourseTree>;
}

/// Persistent storage of course hierarchies and mastery records.
///
/// Implementations must make [`CourseStore::transaction`] all-or-nothing:
/// if the closure fails, nothing it wrote is kept.
pub trait CourseStore: Send + Sync {
    /// Loads the persisted hierarchy; a course never synced is empty.
    fn load_tree(&self, course: &CourseId, deadline: Deadline) -> StoreResult<CourseTree>;

    /// Loads the persisted course title, if one has been synced.
    fn load_title(&self, course: &CourseId, deadline: Deadline) -> StoreResult<Option<String>>;

    /// Runs `f` against a private working copy of the course and commits it
    /// atomically if `f` succeeds and the deadline has not passed.
    fn transaction<T, F>(&self, course: &CourseId, deadline: Deadline, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut dyn CourseTransaction) -> StoreResult<T>;

    /// Creates or replaces the record for `(user, topic)`.
    ///
    /// This is the grading side's entry point; sync never creates records.
    fn record_mastery(&self, course: &CourseId, record: TopicMastery) -> StoreResult<()>;

    /// Active mastery records for a topic.
    fn masteries_for_topic(
        &self,
        course: &CourseId,
        topic: &ExternalId,
    ) -> StoreResult<Vec<TopicMastery>>;

    /// Archived mastery records of a course.
    fn archived_masteries(&self, course: &CourseId) -> StoreResult<Vec<ArchivedMastery>>;

    /// Number of committed transactions for a course.
    fn revision(&self, course: &CourseId) -> StoreResult<u64>;
}
