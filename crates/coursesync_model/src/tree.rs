//! In-memory course hierarchy.
//!
//! A [`CourseTree`] is built from a flat list of [`TreeNode`]s and checked
//! against the hierarchy rules:
//!
//! - every parent reference resolves to a node in the tree
//! - parents are exactly one level up (category → topic → subtopic)
//! - no cycles
//! - ordinal positions are unique among siblings
//!
//! Categories are the top level; they have no parent.

use crate::error::{ModelResult, StructuralError};
use crate::node::{ExternalId, TreeNode};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A validated course hierarchy.
#[derive(Debug, Clone, Default)]
pub struct CourseTree {
    nodes: HashMap<ExternalId, TreeNode>,
    /// Children per parent, ordered by position.
    children: HashMap<ExternalId, Vec<ExternalId>>,
    /// Top-level categories, ordered by position.
    roots: Vec<ExternalId>,
}

impl CourseTree {
    /// Creates an empty tree (a course that was never synced).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a tree from a flat node list.
    ///
    /// # Errors
    ///
    /// Returns a [`StructuralError`] if any hierarchy rule is violated.
    /// Nodes are checked in external-id order, so the same input always
    /// reports the same error.
    pub fn build(nodes: impl IntoIterator<Item = TreeNode>) -> ModelResult<Self> {
        let mut map: HashMap<ExternalId, TreeNode> = HashMap::new();
        for node in nodes {
            if node.external_id.as_str().is_empty() {
                return Err(StructuralError::EmptyId);
            }
            if map.contains_key(&node.external_id) {
                return Err(StructuralError::DuplicateId {
                    id: node.external_id,
                });
            }
            map.insert(node.external_id.clone(), node);
        }

        let mut ids: Vec<&ExternalId> = map.keys().collect();
        ids.sort();

        for id in &ids {
            if let Some(parent) = &map[*id].parent {
                if !map.contains_key(parent) {
                    return Err(StructuralError::MissingParent {
                        id: (*id).clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        check_acyclic(&map, &ids)?;

        for id in &ids {
            let node = &map[*id];
            let parent_kind = node.parent.as_ref().map(|p| map[p].kind);
            if parent_kind != node.kind.parent_kind() {
                return Err(StructuralError::InvalidParent {
                    id: node.external_id.clone(),
                    kind: node.kind,
                    parent: node.parent.clone(),
                    parent_kind,
                });
            }
        }

        let mut siblings: BTreeMap<Option<ExternalId>, Vec<ExternalId>> = BTreeMap::new();
        for id in &ids {
            siblings
                .entry(map[*id].parent.clone())
                .or_default()
                .push((*id).clone());
        }

        let mut children = HashMap::new();
        let mut roots = Vec::new();
        for (parent, mut list) in siblings {
            list.sort_by_key(|id| map[id].position);
            if let Some(pair) = list
                .windows(2)
                .find(|pair| map[&pair[0]].position == map[&pair[1]].position)
            {
                return Err(StructuralError::DuplicatePosition {
                    parent,
                    position: map[&pair[0]].position,
                });
            }
            match parent {
                Some(parent) => {
                    children.insert(parent, list);
                }
                None => roots = list,
            }
        }

        Ok(Self {
            nodes: map,
            children,
            roots,
        })
    }

    /// Looks up a node by external ID.
    #[must_use]
    pub fn get(&self, id: &ExternalId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    /// Returns true if the tree contains the node.
    #[must_use]
    pub fn contains(&self, id: &ExternalId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level categories in position order.
    pub fn roots(&self) -> impl Iterator<Item = &TreeNode> + '_ {
        self.roots.iter().map(move |id| &self.nodes[id])
    }

    /// Children of a node in position order.
    pub fn children_of<'a>(&'a self, id: &ExternalId) -> impl Iterator<Item = &'a TreeNode> + 'a {
        self.children
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(move |child| &self.nodes[child])
    }

    /// Nodes in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> + '_ {
        self.nodes.values()
    }

    /// Depth-first traversal, parents before children, siblings in
    /// position order.
    ///
    /// The traversal is lazy; call again to restart it.
    #[must_use]
    pub fn depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: self.roots.iter().rev().collect(),
        }
    }

    /// Consumes the tree, returning its nodes in depth-first order.
    #[must_use]
    pub fn into_nodes(self) -> Vec<TreeNode> {
        let order: Vec<ExternalId> = self
            .depth_first()
            .map(|node| node.external_id.clone())
            .collect();
        let mut nodes = self.nodes;
        order
            .into_iter()
            .filter_map(|id| nodes.remove(&id))
            .collect()
    }

    /// SHA-256 digest over every significant field, in depth-first order.
    ///
    /// Two trees are structurally equal iff their fingerprints match.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        for node in self.depth_first() {
            field(node.external_id.as_str().as_bytes());
            field(&[node.kind.depth()]);
            field(node.parent.as_ref().map_or(&[][..], |p| p.as_str().as_bytes()));
            field(node.display_name.as_bytes());
            field(&node.position.to_le_bytes());
            field(node.content.to_string().as_bytes());
        }
        hasher.finalize().into()
    }
}

impl PartialEq for CourseTree {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

/// Lazy depth-first iterator over a [`CourseTree`].
#[derive(Debug, Clone)]
pub struct DepthFirst<'a> {
    tree: &'a CourseTree,
    stack: Vec<&'a ExternalId>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        if let Some(children) = self.tree.children.get(id) {
            self.stack.extend(children.iter().rev());
        }
        self.tree.nodes.get(id)
    }
}

/// Walks parent links from every node; each node is walked at most once.
fn check_acyclic(map: &HashMap<ExternalId, TreeNode>, ids: &[&ExternalId]) -> ModelResult<()> {
    let mut settled: HashSet<&ExternalId> = HashSet::new();
    for &start in ids {
        let mut on_path: HashSet<&ExternalId> = HashSet::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            if settled.contains(id) {
                break;
            }
            if !on_path.insert(id) {
                return Err(StructuralError::Cycle { id: id.clone() });
            }
            cursor = map.get(id).and_then(|node| node.parent.as_ref());
        }
        settled.extend(on_path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    fn sample() -> Vec<TreeNode> {
        vec![
            TreeNode::subtopic("s2", "t1", "Factoring", 1),
            TreeNode::category("c2", "Geometry", 1),
            TreeNode::topic("t1", "c1", "Algebra", 0),
            TreeNode::category("c1", "Numbers", 0),
            TreeNode::subtopic("s1", "t1", "Expressions", 0),
            TreeNode::topic("t2", "c2", "Angles", 0),
        ]
    }

    #[test]
    fn builds_and_traverses_depth_first() {
        let tree = CourseTree::build(sample()).unwrap();
        assert_eq!(tree.len(), 6);

        let order: Vec<&str> = tree
            .depth_first()
            .map(|node| node.external_id.as_str())
            .collect();
        assert_eq!(order, vec!["c1", "t1", "s1", "s2", "c2", "t2"]);

        // Restartable
        assert_eq!(tree.depth_first().count(), 6);
    }

    #[test]
    fn children_are_position_ordered() {
        let tree = CourseTree::build(sample()).unwrap();
        let names: Vec<&str> = tree
            .children_of(&ExternalId::new("t1"))
            .map(|node| node.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["Expressions", "Factoring"]);
        assert_eq!(tree.children_of(&ExternalId::new("s1")).count(), 0);
        assert_eq!(tree.roots().count(), 2);
    }

    #[test]
    fn lookup() {
        let tree = CourseTree::build(sample()).unwrap();
        let node = tree.get(&ExternalId::new("t2")).unwrap();
        assert_eq!(node.kind, NodeKind::Topic);
        assert!(!tree.contains(&ExternalId::new("missing")));
    }

    #[test]
    fn rejects_missing_parent() {
        let err = CourseTree::build(vec![TreeNode::topic("t1", "c9", "Algebra", 0)]).unwrap_err();
        assert_eq!(
            err,
            StructuralError::MissingParent {
                id: ExternalId::new("t1"),
                parent: ExternalId::new("c9"),
            }
        );
    }

    #[test]
    fn rejects_wrong_parent_kind() {
        let err = CourseTree::build(vec![
            TreeNode::category("c1", "Numbers", 0),
            TreeNode::subtopic("s1", "c1", "Expressions", 0),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            StructuralError::InvalidParent { ref id, .. } if id.as_str() == "s1"
        ));

        let err = CourseTree::build(vec![TreeNode {
            parent: None,
            ..TreeNode::topic("t1", "x", "Loose", 0)
        }])
        .unwrap_err();
        assert!(matches!(err, StructuralError::InvalidParent { parent: None, .. }));
    }

    #[test]
    fn rejects_cycles() {
        let err = CourseTree::build(vec![
            TreeNode::topic("t1", "t2", "A", 0),
            TreeNode::topic("t2", "t1", "B", 0),
        ])
        .unwrap_err();
        assert!(matches!(err, StructuralError::Cycle { .. }));
    }

    #[test]
    fn rejects_duplicates() {
        let err = CourseTree::build(vec![
            TreeNode::category("c1", "A", 0),
            TreeNode::category("c1", "B", 1),
        ])
        .unwrap_err();
        assert!(matches!(err, StructuralError::DuplicateId { .. }));

        let err = CourseTree::build(vec![
            TreeNode::category("c1", "A", 0),
            TreeNode::category("c2", "B", 0),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            StructuralError::DuplicatePosition {
                parent: None,
                position: 0
            }
        );

        let err = CourseTree::build(vec![TreeNode::category("", "A", 0)]).unwrap_err();
        assert_eq!(err, StructuralError::EmptyId);
    }

    #[test]
    fn fingerprint_tracks_significant_fields() {
        let a = CourseTree::build(sample()).unwrap();
        let mut shuffled = sample();
        shuffled.reverse();
        let b = CourseTree::build(shuffled).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut renamed = sample();
        renamed[0].display_name = "Factorising".into();
        let c = CourseTree::build(renamed).unwrap();
        assert_ne!(a, c);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn into_nodes_round_trip() {
        let tree = CourseTree::build(sample()).unwrap();
        let rebuilt = CourseTree::build(tree.clone().into_nodes()).unwrap();
        assert_eq!(tree, rebuilt);
        assert!(CourseTree::empty().is_empty());
    }
}
