//! Identifiers and tree nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier assigned by the source system to a content node.
///
/// This is the only key that survives renames and moves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Creates a new external ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a course (one synchronization unit).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(String);

impl CourseId {
    /// Creates a new course ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CourseId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a learner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new user ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Level of a node in the course hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Top-level grouping (a chapter).
    Category,
    /// Unit of mastery tracking.
    Topic,
    /// Leaf content under a topic.
    SubTopic,
}

impl NodeKind {
    /// Returns the kind a parent of this kind must have, or `None` for
    /// top-level nodes.
    #[must_use]
    pub const fn parent_kind(self) -> Option<NodeKind> {
        match self {
            NodeKind::Category => None,
            NodeKind::Topic => Some(NodeKind::Category),
            NodeKind::SubTopic => Some(NodeKind::Topic),
        }
    }

    /// Depth of this kind in the hierarchy, starting at 0 for categories.
    #[must_use]
    pub const fn depth(self) -> u8 {
        match self {
            NodeKind::Category => 0,
            NodeKind::Topic => 1,
            NodeKind::SubTopic => 2,
        }
    }

    /// Returns the kind at the given depth.
    #[must_use]
    pub const fn from_depth(depth: usize) -> Option<NodeKind> {
        match depth {
            0 => Some(NodeKind::Category),
            1 => Some(NodeKind::Topic),
            2 => Some(NodeKind::SubTopic),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Category => "category",
            NodeKind::Topic => "topic",
            NodeKind::SubTopic => "subtopic",
        };
        f.write_str(name)
    }
}

/// One node of a course outline snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Stable source identifier.
    pub external_id: ExternalId,
    /// Hierarchy level.
    pub kind: NodeKind,
    /// Parent node, `None` for top-level categories.
    pub parent: Option<ExternalId>,
    /// Human readable name.
    pub display_name: String,
    /// Position among siblings.
    pub position: u32,
    /// Opaque content fields carried by the source.
    #[serde(default)]
    pub content: serde_json::Value,
}

impl TreeNode {
    /// Creates a top-level category node.
    pub fn category(id: impl Into<String>, name: impl Into<String>, position: u32) -> Self {
        Self {
            external_id: ExternalId::new(id),
            kind: NodeKind::Category,
            parent: None,
            display_name: name.into(),
            position,
            content: serde_json::Value::Null,
        }
    }

    /// Creates a topic under the given category.
    pub fn topic(
        id: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        position: u32,
    ) -> Self {
        Self {
            external_id: ExternalId::new(id),
            kind: NodeKind::Topic,
            parent: Some(ExternalId::new(parent)),
            display_name: name.into(),
            position,
            content: serde_json::Value::Null,
        }
    }

    /// Creates a subtopic under the given topic.
    pub fn subtopic(
        id: impl Into<String>,
        parent: impl Into<String>,
        name: impl Into<String>,
        position: u32,
    ) -> Self {
        Self {
            external_id: ExternalId::new(id),
            kind: NodeKind::SubTopic,
            parent: Some(ExternalId::new(parent)),
            display_name: name.into(),
            position,
            content: serde_json::Value::Null,
        }
    }

    /// Replaces the content payload.
    #[must_use]
    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }
}
