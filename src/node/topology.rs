//! Local mirror of the RPL DoDAG.
//!
//! The tree is rooted at the border router. Every edge records which
//! endpoint is the parent and which is the child, so a node can be adjacent
//! to several others while having at most one parent at any time.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use super::id::NodeId;

/// A parent → child edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub parent: NodeId,
    pub child: NodeId,
}

/// The DoDAG as seen by the controller.
#[derive(Debug, Clone)]
pub struct Topology {
    root: NodeId,
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Keyed by the unordered endpoint pair (smaller id first).
    edges: BTreeMap<(NodeId, NodeId), Edge>,
}

fn edge_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Topology {
    /// Create a topology containing only the root.
    pub fn new(root: NodeId) -> Self {
        let mut adjacency = BTreeMap::new();
        adjacency.insert(root, BTreeSet::new());
        Topology {
            root,
            adjacency,
            edges: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.adjacency.contains_key(&node)
    }

    /// Number of known nodes, root included.
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Insert a node with no edges. Returns `false` if it was already known.
    pub fn attach_node(&mut self, node: NodeId) -> bool {
        if self.adjacency.contains_key(&node) {
            return false;
        }
        self.adjacency.insert(node, BTreeSet::new());
        true
    }

    /// Make `child` a child of `parent`, severing any stale parent edge.
    ///
    /// Returns `true` only if the tree changed. The root never gets a parent,
    /// and an edge that would hang `child` below its own descendant is
    /// refused; see [`would_cycle`](Topology::would_cycle).
    pub fn attach_child(&mut self, child: NodeId, parent: NodeId) -> bool {
        if child == self.root || child == parent {
            return false;
        }
        if self.edges.get(&edge_key(child, parent)).is_some_and(|e| e.parent == parent) {
            return false;
        }
        if self.would_cycle(child, parent) {
            debug!(node = %child, %parent, "refusing edge that closes a cycle");
            return false;
        }
        self.attach_node(child);
        self.attach_node(parent);

        if let Some(old) = self.parent(child) {
            debug!(node = %child, old_parent = %old, new_parent = %parent, "severing stale parent edge");
            self.remove_edge(child, old);
        }

        self.edges.insert(edge_key(child, parent), Edge { parent, child });
        if let Some(adj) = self.adjacency.get_mut(&child) {
            adj.insert(parent);
        }
        if let Some(adj) = self.adjacency.get_mut(&parent) {
            adj.insert(child);
        }
        trace!(child = %child, parent = %parent, "edge attached");
        true
    }

    /// Remove `node` and everything hanging below it.
    ///
    /// Returns the removed nodes, `node` first. The root is never removed.
    pub fn detach_node(&mut self, node: NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        if node == self.root || !self.contains(node) {
            return removed;
        }
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            // Push in reverse so descendants come out in ascending order.
            let mut children = self.children(current);
            children.reverse();
            stack.extend(children);

            let neighbors: Vec<NodeId> = self
                .adjacency
                .get(&current)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for other in neighbors {
                self.remove_edge(current, other);
            }
            self.adjacency.remove(&current);
            removed.push(current);
        }
        debug!(node = %node, cascade = removed.len(), "detached from topology");
        removed
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.adjacency.get(&node)?.iter().find_map(|other| {
            let edge = self.edges.get(&edge_key(node, *other))?;
            (edge.child == node).then_some(edge.parent)
        })
    }

    /// Nodes whose edge to `node` marks them as its child.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let Some(adj) = self.adjacency.get(&node) else {
            return Vec::new();
        };
        adj.iter()
            .copied()
            .filter(|other| {
                self.edges
                    .get(&edge_key(node, *other))
                    .is_some_and(|e| e.parent == node && e.child == *other)
            })
            .collect()
    }

    /// Every adjacent node regardless of role.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.adjacency
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[inline]
    pub fn are_neighbors(&self, a: NodeId, b: NodeId) -> bool {
        self.edges.contains_key(&edge_key(a, b))
    }

    /// Hops from `node` to the root, `None` if it hangs in a detached subtree.
    pub fn depth(&self, node: NodeId) -> Option<usize> {
        if !self.contains(node) {
            return None;
        }
        let mut depth = 0;
        let mut current = node;
        while current != self.root {
            current = self.parent(current)?;
            depth += 1;
            if depth > self.adjacency.len() {
                return None;
            }
        }
        Some(depth)
    }

    /// `true` if `parent` currently hangs below `child`, so the edge
    /// `child -> parent` would close a loop.
    #[inline]
    pub fn would_cycle(&self, child: NodeId, parent: NodeId) -> bool {
        self.is_ancestor(child, parent)
    }

    /// `true` if `ancestor` lies on the parent chain above `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = node;
        for _ in 0..self.adjacency.len() {
            match self.parent(current) {
                Some(p) if p == ancestor => return true,
                Some(p) => current = p,
                None => return false,
            }
        }
        false
    }

    fn remove_edge(&mut self, a: NodeId, b: NodeId) {
        self.edges.remove(&edge_key(a, b));
        if let Some(adj) = self.adjacency.get_mut(&a) {
            adj.remove(&b);
        }
        if let Some(adj) = self.adjacency.get_mut(&b) {
            adj.remove(&a);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::node;
    use proptest::prelude::*;

    fn tree() -> Topology {
        // root(0) ─ 1 ─ 3
        //         └ 2
        let mut t = Topology::new(node(0));
        t.attach_child(node(1), node(0));
        t.attach_child(node(2), node(0));
        t.attach_child(node(3), node(1));
        t
    }

    #[test]
    fn test_attach_node_idempotent() {
        let mut t = Topology::new(node(0));
        assert!(t.attach_node(node(1)));
        assert!(!t.attach_node(node(1)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_parent_children_depth() {
        let t = tree();
        assert_eq!(t.parent(node(3)), Some(node(1)));
        assert_eq!(t.parent(node(0)), None);
        assert_eq!(t.children(node(0)), vec![node(1), node(2)]);
        assert_eq!(t.neighbors(node(1)), vec![node(0), node(3)]);
        assert_eq!(t.depth(node(0)), Some(0));
        assert_eq!(t.depth(node(3)), Some(2));
    }

    #[test]
    fn test_attach_existing_edge_is_not_a_change() {
        let mut t = tree();
        assert!(!t.attach_child(node(3), node(1)));
    }

    #[test]
    fn test_rewire_severs_stale_parent() {
        let mut t = tree();
        assert!(t.attach_child(node(3), node(2)));
        assert_eq!(t.parent(node(3)), Some(node(2)));
        assert!(t.children(node(1)).is_empty());
        assert!(!t.are_neighbors(node(1), node(3)));
    }

    #[test]
    fn test_root_never_gets_parent() {
        let mut t = tree();
        assert!(!t.attach_child(node(0), node(1)));
        assert_eq!(t.parent(node(0)), None);
    }

    #[test]
    fn test_edge_to_own_child_is_refused() {
        let mut t = tree();
        // 1 now claims to be a child of its own child 3.
        assert!(t.would_cycle(node(1), node(3)));
        assert!(!t.attach_child(node(1), node(3)));
        assert_eq!(t.parent(node(1)), Some(node(0)));
        assert_eq!(t.parent(node(3)), Some(node(1)));
    }

    #[test]
    fn test_edge_to_deep_descendant_is_refused() {
        let mut t = tree();
        t.attach_child(node(4), node(3));
        assert!(!t.attach_child(node(1), node(4)));
        for n in [node(1), node(3), node(4)] {
            assert!(t.depth(n).is_some(), "{} lost its path to the root", n);
        }
        // Once 4 moves away the same claim is accepted.
        assert!(t.attach_child(node(4), node(2)));
        assert!(!t.would_cycle(node(1), node(4)));
        assert!(t.attach_child(node(1), node(4)));
        assert_eq!(t.depth(node(1)), Some(3));
        assert_eq!(t.depth(node(3)), Some(4));
    }

    #[test]
    fn test_detach_cascades() {
        let mut t = tree();
        let removed = t.detach_node(node(1));
        assert_eq!(removed, vec![node(1), node(3)]);
        assert!(!t.contains(node(3)));
        assert_eq!(t.children(node(0)), vec![node(2)]);
    }

    #[test]
    fn test_detach_root_refused() {
        let mut t = tree();
        assert!(t.detach_node(node(0)).is_empty());
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_detach_deep_chain() {
        let mut t = Topology::new(node(0));
        for i in 1..2_000u64 {
            t.attach_child(node(i), node(i - 1));
        }
        assert_eq!(t.depth(node(1_999)), Some(1_999));
        let removed = t.detach_node(node(1));
        assert_eq!(removed.len(), 1_998);
        assert_eq!(t.len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Attach(u64, u64),
        Detach(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..12, 0u64..12).prop_map(|(c, p)| Op::Attach(c, p)),
            (1u64..12).prop_map(Op::Detach),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_node_has_at_most_one_parent(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let mut t = Topology::new(node(0));
            for op in ops {
                match op {
                    Op::Attach(c, p) => { t.attach_child(node(c), node(p)); }
                    Op::Detach(n) => { t.detach_node(node(n)); }
                }
                for n in t.nodes().collect::<Vec<_>>() {
                    let parents = t.edges().filter(|e| e.child == n).count();
                    prop_assert!(parents <= 1, "{} has {} parents", n, parents);
                }
                prop_assert!(t.parent(t.root()).is_none());
                prop_assert!(t.contains(t.root()));
                for n in t.nodes().collect::<Vec<_>>() {
                    prop_assert!(!t.is_ancestor(n, n), "{} sits on a cycle", n);
                }
            }
        }
    }
}
