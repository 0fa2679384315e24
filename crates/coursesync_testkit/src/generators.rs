//! Property-based test generators using proptest.
//!
//! Trees are drawn over fixed ID pools (`C0..`, `T0..`, `S0..`), so two
//! generated trees share identities and their diff exercises every
//! operation kind. IDs from the floating pool (`X0..`) take their level from
//! their parent, so the same ID can be a category in one tree and a topic or
//! subtopic in the next. Generated trees always satisfy the hierarchy rules.

use coursesync_model::{CourseTree, NodeKind, TreeNode};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Number of category IDs in the pool.
pub const CATEGORY_POOL: usize = 4;
/// Number of topic IDs in the pool.
pub const TOPIC_POOL: usize = 8;
/// Number of subtopic IDs in the pool.
pub const SUBTOPIC_POOL: usize = 10;
/// Number of level-changing IDs in the pool.
pub const FLOATING_POOL: usize = 4;
/// Parent choices of a floating slot: the root, then every category, then
/// every topic.
pub const FLOATING_PARENTS: usize = 1 + CATEGORY_POOL + TOPIC_POOL;

/// Placement of one pooled ID in a generated tree.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    /// Whether the node is present.
    pub include: bool,
    /// Index of the parent in the pool one level up.
    pub parent: usize,
    /// Sort key among siblings.
    pub order: u16,
    /// Display name variant.
    pub name: u8,
    /// Content variant; zero is no content.
    pub content: u8,
}

/// One entry per pooled ID, by level.
#[derive(Debug, Clone)]
pub struct Layout<T = Slot> {
    /// Category entries.
    pub categories: Vec<T>,
    /// Topic entries.
    pub topics: Vec<T>,
    /// Subtopic entries.
    pub subtopics: Vec<T>,
    /// Floating entries; always leaves.
    pub floating: Vec<T>,
}

/// One random change to a slot.
#[derive(Debug, Clone, Copy)]
pub enum Tweak {
    /// Leave the slot alone.
    Keep,
    /// Add or remove the node.
    Toggle,
    /// Move under another parent.
    Reparent(usize),
    /// Change the sibling sort key.
    Reorder(u16),
    /// Change the display name.
    Rename(u8),
    /// Change the content.
    Recontent(u8),
}

impl Slot {
    fn apply(mut self, tweak: Tweak) -> Self {
        match tweak {
            Tweak::Keep => {}
            Tweak::Toggle => self.include = !self.include,
            Tweak::Reparent(parent) => self.parent = parent,
            Tweak::Reorder(order) => self.order = order,
            Tweak::Rename(name) => self.name = name,
            Tweak::Recontent(content) => self.content = content,
        }
        self
    }
}

impl Layout {
    /// Builds the tree this layout describes.
    ///
    /// Nodes whose parent is absent are dropped. Sibling positions are
    /// assigned densely from the sort keys.
    pub fn build(&self) -> CourseTree {
        let categories = present(&self.categories, "C", |_| true);
        let topics = present(&self.topics, "T", |slot| categories[slot.parent].is_some());
        let subtopics = present(&self.subtopics, "S", |slot| topics[slot.parent].is_some());
        let floating: Vec<Option<(NodeKind, Option<&str>)>> = self
            .floating
            .iter()
            .map(|slot| {
                if slot.include {
                    floating_place(slot.parent, &categories, &topics)
                } else {
                    None
                }
            })
            .collect();
        let floating_ids: Vec<String> =
            (0..self.floating.len()).map(|i| format!("X{i}")).collect();

        let mut siblings: BTreeMap<Option<&str>, Vec<Entry<'_>>> = BTreeMap::new();
        for (id, slot) in categories.iter().zip(&self.categories) {
            if let Some(id) = id {
                siblings
                    .entry(None)
                    .or_default()
                    .push((slot.order, id.as_str(), NodeKind::Category, slot));
            }
        }
        for (id, slot) in topics.iter().zip(&self.topics) {
            if let Some(id) = id {
                siblings
                    .entry(categories[slot.parent].as_deref())
                    .or_default()
                    .push((slot.order, id.as_str(), NodeKind::Topic, slot));
            }
        }
        for (id, slot) in subtopics.iter().zip(&self.subtopics) {
            if let Some(id) = id {
                siblings
                    .entry(topics[slot.parent].as_deref())
                    .or_default()
                    .push((slot.order, id.as_str(), NodeKind::SubTopic, slot));
            }
        }
        for ((placement, id), slot) in floating.iter().zip(&floating_ids).zip(&self.floating) {
            if let Some((kind, parent)) = placement {
                siblings
                    .entry(*parent)
                    .or_default()
                    .push((slot.order, id.as_str(), *kind, slot));
            }
        }

        let mut nodes = Vec::new();
        for (parent, mut group) in siblings {
            group.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            for (position, (_, id, kind, slot)) in group.into_iter().enumerate() {
                nodes.push(node(kind, id, parent, slot, position as u32));
            }
        }

        CourseTree::build(nodes).expect("generated layouts are valid")
    }

    /// Applies one tweak per slot.
    pub fn tweaked(&self, tweaks: &Layout<Tweak>) -> Layout {
        fn zip(slots: &[Slot], tweaks: &[Tweak]) -> Vec<Slot> {
            slots
                .iter()
                .zip(tweaks.iter().chain(std::iter::repeat(&Tweak::Keep)))
                .map(|(slot, tweak)| slot.apply(*tweak))
                .collect()
        }
        Layout {
            categories: zip(&self.categories, &tweaks.categories),
            topics: zip(&self.topics, &tweaks.topics),
            subtopics: zip(&self.subtopics, &tweaks.subtopics),
            floating: zip(&self.floating, &tweaks.floating),
        }
    }
}

/// Sort key, ID, kind and slot of one placed node.
type Entry<'a> = (u16, &'a str, NodeKind, &'a Slot);

/// IDs of included slots whose parent is present.
fn present(
    slots: &[Slot],
    prefix: &str,
    parent_present: impl Fn(&Slot) -> bool,
) -> Vec<Option<String>> {
    slots
        .iter()
        .enumerate()
        .map(|(i, slot)| (slot.include && parent_present(slot)).then(|| format!("{prefix}{i}")))
        .collect()
}

/// Level and parent of a floating slot, or `None` if its parent is absent.
fn floating_place<'a>(
    parent: usize,
    categories: &'a [Option<String>],
    topics: &'a [Option<String>],
) -> Option<(NodeKind, Option<&'a str>)> {
    if parent == 0 {
        return Some((NodeKind::Category, None));
    }
    let index = parent - 1;
    match categories.get(index) {
        Some(category) => category.as_deref().map(|c| (NodeKind::Topic, Some(c))),
        None => topics
            .get(index - categories.len())?
            .as_deref()
            .map(|t| (NodeKind::SubTopic, Some(t))),
    }
}

fn node(kind: NodeKind, id: &str, parent: Option<&str>, slot: &Slot, position: u32) -> TreeNode {
    let name = format!("{kind} {id} v{}", slot.name);
    let node = match (kind, parent) {
        (NodeKind::Category, _) | (_, None) => TreeNode::category(id, name, position),
        (NodeKind::Topic, Some(parent)) => TreeNode::topic(id, parent, name, position),
        (NodeKind::SubTopic, Some(parent)) => TreeNode::subtopic(id, parent, name, position),
    };
    node.with_content(content(slot.content))
}

fn content(variant: u8) -> Value {
    match variant {
        0 => Value::Null,
        n => json!({"category": "sequential", "rev": n}),
    }
}

/// Strategy for one slot whose parent is drawn from `parents` IDs.
pub fn slot_strategy(parents: usize) -> impl Strategy<Value = Slot> {
    (any::<bool>(), 0..parents.max(1), 0..8u16, 0..3u8, 0..3u8).prop_map(
        |(include, parent, order, name, content)| Slot {
            include,
            parent,
            order,
            name,
            content,
        },
    )
}

/// Strategy for a full layout.
pub fn layout_strategy() -> impl Strategy<Value = Layout> {
    (
        prop::collection::vec(slot_strategy(1), CATEGORY_POOL),
        prop::collection::vec(slot_strategy(CATEGORY_POOL), TOPIC_POOL),
        prop::collection::vec(slot_strategy(TOPIC_POOL), SUBTOPIC_POOL),
        prop::collection::vec(slot_strategy(FLOATING_PARENTS), FLOATING_POOL),
    )
        .prop_map(|(categories, topics, subtopics, floating)| Layout {
            categories,
            topics,
            subtopics,
            floating,
        })
}

/// Strategy for a tweak, mostly [`Tweak::Keep`].
pub fn tweak_strategy(parents: usize) -> impl Strategy<Value = Tweak> {
    prop_oneof![
        4 => Just(Tweak::Keep),
        1 => Just(Tweak::Toggle),
        1 => (0..parents.max(1)).prop_map(Tweak::Reparent),
        1 => (0..8u16).prop_map(Tweak::Reorder),
        1 => (0..3u8).prop_map(Tweak::Rename),
        1 => (0..3u8).prop_map(Tweak::Recontent),
    ]
}

/// Tweaks for every slot of a layout.
pub type TweakSet = Layout<Tweak>;

/// Strategy for a tweak set.
pub fn tweak_set_strategy() -> impl Strategy<Value = TweakSet> {
    (
        prop::collection::vec(tweak_strategy(1), CATEGORY_POOL),
        prop::collection::vec(tweak_strategy(CATEGORY_POOL), TOPIC_POOL),
        prop::collection::vec(tweak_strategy(TOPIC_POOL), SUBTOPIC_POOL),
        prop::collection::vec(tweak_strategy(FLOATING_PARENTS), FLOATING_POOL),
    )
        .prop_map(|(categories, topics, subtopics, floating)| Layout {
            categories,
            topics,
            subtopics,
            floating,
        })
}

/// Strategy for valid course trees.
pub fn course_tree_strategy() -> impl Strategy<Value = CourseTree> {
    layout_strategy().prop_map(|layout| layout.build())
}

/// Strategy for an `(old, new)` pair where `new` is a random edit of `old`.
pub fn tree_pair_strategy() -> impl Strategy<Value = (CourseTree, CourseTree)> {
    (layout_strategy(), tweak_set_strategy())
        .prop_map(|(layout, tweaks)| (layout.build(), layout.tweaked(&tweaks).build()))
}

/// Strategy for two unrelated trees over the same ID pools.
pub fn unrelated_pair_strategy() -> impl Strategy<Value = (CourseTree, CourseTree)> {
    (course_tree_strategy(), course_tree_strategy())
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
