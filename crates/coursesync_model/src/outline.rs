//! Decoding of source course-outline documents.
//!
//! The source publishes a nested block document:
//!
//! ```text
//! course_structure
//! └─ child_info.children      → categories (chapters)
//!    └─ child_info.children   → topics (sequentials)
//!       └─ child_info.children → subtopics (verticals)
//! ```
//!
//! Blocks without an `id` are skipped. A block's position is its index
//! among the kept siblings. Every field other than `id`, `display_name`,
//! `child_info` and the configured ignore list becomes the node's content
//! payload. Blocks nested below subtopics are folded into the subtopic's
//! payload as a `children` list of IDs.

use crate::error::{ModelResult, StructuralError};
use crate::node::{ExternalId, NodeKind, TreeNode};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Fields dropped from every block before it becomes a content payload.
///
/// These change on every publish without any change to the content.
pub const DEFAULT_IGNORED_FIELDS: &[&str] = &[
    "has_children",
    "edited_on",
    "edited_by",
    "published_on",
    "published_by",
];

/// Options for outline decoding.
#[derive(Debug, Clone)]
pub struct OutlineOptions {
    /// Field names excluded from content payloads.
    pub ignored_fields: Vec<String>,
}

impl Default for OutlineOptions {
    fn default() -> Self {
        Self {
            ignored_fields: DEFAULT_IGNORED_FIELDS.iter().map(|f| (*f).to_string()).collect(),
        }
    }
}

impl OutlineOptions {
    /// Adds a field to the ignore list.
    #[must_use]
    pub fn ignore_field(mut self, field: impl Into<String>) -> Self {
        self.ignored_fields.push(field.into());
        self
    }
}

/// A decoded course outline.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseOutline {
    /// The course title, if the document carries one.
    pub title: Option<String>,
    /// All nodes, parents before children.
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Deserialize)]
struct OutlineDocument {
    course_structure: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    child_info: Option<ChildInfo>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ChildInfo {
    #[serde(default)]
    children: Vec<Block>,
}

impl Block {
    fn children(&self) -> &[Block] {
        self.child_info
            .as_ref()
            .map_or(&[][..], |info| info.children.as_slice())
    }
}

/// Decodes an outline document from JSON text.
///
/// # Errors
///
/// Returns [`StructuralError::MalformedOutline`] if the document cannot be
/// parsed or a block lacks a display name.
pub fn parse_outline(json: &str, options: &OutlineOptions) -> ModelResult<CourseOutline> {
    let document: OutlineDocument = serde_json::from_str(json)
        .map_err(|e| StructuralError::MalformedOutline(e.to_string()))?;
    decode(document, options)
}

/// Decodes an outline document from an already parsed JSON value.
///
/// # Errors
///
/// Same as [`parse_outline`].
pub fn outline_from_value(value: Value, options: &OutlineOptions) -> ModelResult<CourseOutline> {
    let document: OutlineDocument = serde_json::from_value(value)
        .map_err(|e| StructuralError::MalformedOutline(e.to_string()))?;
    decode(document, options)
}

fn decode(document: OutlineDocument, options: &OutlineOptions) -> ModelResult<CourseOutline> {
    let mut nodes = Vec::new();
    collect(document.course_structure.children(), None, 0, options, &mut nodes)?;
    Ok(CourseOutline {
        title: document.course_structure.display_name,
        nodes,
    })
}

fn collect(
    blocks: &[Block],
    parent: Option<&ExternalId>,
    depth: usize,
    options: &OutlineOptions,
    out: &mut Vec<TreeNode>,
) -> ModelResult<()> {
    let Some(kind) = NodeKind::from_depth(depth) else {
        return Ok(());
    };

    let kept = blocks
        .iter()
        .filter_map(|block| block.id.as_deref().filter(|id| !id.is_empty()).map(|id| (id, block)));

    for (position, (id, block)) in kept.enumerate() {
        let display_name = block.display_name.clone().ok_or_else(|| {
            StructuralError::MalformedOutline(format!("block {id} has no display_name"))
        })?;
        let external_id = ExternalId::new(id);

        out.push(TreeNode {
            external_id: external_id.clone(),
            kind,
            parent: parent.cloned(),
            display_name,
            position: position as u32,
            content: content_of(block, kind, options),
        });

        collect(block.children(), Some(&external_id), depth + 1, options, out)?;
    }
    Ok(())
}

fn content_of(block: &Block, kind: NodeKind, options: &OutlineOptions) -> Value {
    let mut fields: Map<String, Value> = block
        .fields
        .iter()
        .filter(|(key, _)| !options.ignored_fields.iter().any(|ignored| ignored == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if kind == NodeKind::SubTopic {
        let nested: Vec<Value> = block
            .children()
            .iter()
            .filter_map(|child| child.id.clone())
            .map(Value::String)
            .collect();
        if !nested.is_empty() {
            fields.insert("children".to_string(), Value::Array(nested));
        }
    }

    if fields.is_empty() {
        Value::Null
    } else {
        Value::Object(fields)
    }
}
