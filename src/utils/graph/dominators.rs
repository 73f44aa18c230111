//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` must pass
//! through `d`. The tree is computed with the iterative algorithm of Cooper, Harvey and
//! Kennedy ("A Simple, Fast Dominance Algorithm"), which converges in very few iterations on
//! the reducible graphs produced by bytecode compilers.

use crate::utils::graph::{reverse_postorder, NodeId, Successors};

/// Result of dominator tree computation.
///
/// Nodes unreachable from the entry have no immediate dominator and are dominated by nothing
/// but themselves.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator for each node, `None` for the entry and unreachable nodes
    idom: Vec<Option<NodeId>>,
    /// Children of each node in the dominator tree, sorted by node id
    children: Vec<Vec<NodeId>>,
    /// Reverse postorder of the reachable nodes
    rpo: Vec<NodeId>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node.
    #[inline]
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        node == self.entry || self.immediate_dominator(node).is_some()
    }

    /// Checks if node `a` dominates node `b`.
    ///
    /// A node dominates itself.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the children of a node in the dominator tree.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children.get(node.index()).map_or(&[], Vec::as_slice)
    }

    /// Returns the reachable nodes in reverse postorder.
    #[must_use]
    pub fn reverse_postorder(&self) -> &[NodeId] {
        &self.rpo
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
///
/// # Arguments
///
/// * `graph` - The graph to analyze
/// * `entry` - The root node
///
/// # Returns
///
/// A [`DominatorTree`] covering every node of the graph.
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors,
{
    let node_count = graph.node_count();
    let rpo = reverse_postorder(graph, entry);

    let mut order = vec![usize::MAX; node_count];
    for (position, node) in rpo.iter().enumerate() {
        order[node.index()] = position;
    }

    let mut predecessors: Vec<Vec<NodeId>> = vec![Vec::new(); node_count];
    for &node in &rpo {
        for succ in graph.successors(node) {
            predecessors[succ.index()].push(node);
        }
    }

    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    if entry.index() < node_count {
        idom[entry.index()] = Some(entry);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for &pred in &predecessors[node.index()] {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &order, pred, current),
                });
            }
            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    // The entry maps to itself during the fixpoint; expose it as the root.
    if entry.index() < node_count {
        idom[entry.index()] = None;
    }

    let mut children = vec![Vec::new(); node_count];
    for (index, parent) in idom.iter().enumerate() {
        if let Some(parent) = parent {
            children[parent.index()].push(NodeId::new(index));
        }
    }

    DominatorTree {
        entry,
        idom,
        children,
        rpo,
    }
}

fn intersect(idom: &[Option<NodeId>], order: &[usize], a: NodeId, b: NodeId) -> NodeId {
    let (mut a, mut b) = (a, b);
    while a != b {
        while order[a.index()] > order[b.index()] {
            match idom[a.index()] {
                Some(parent) => a = parent,
                None => return b,
            }
        }
        while order[b.index()] > order[a.index()] {
            match idom[b.index()] {
                Some(parent) => b = parent,
                None => return a,
            }
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::tests::TestGraph;

    #[test]
    fn test_diamond() {
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let tree = compute_dominators(&graph, NodeId::new(0));
        assert_eq!(tree.immediate_dominator(NodeId::new(3)), Some(NodeId::new(0)));
        assert!(!tree.strictly_dominates(NodeId::new(1), NodeId::new(3)));
        assert!(tree.dominates(NodeId::new(0), NodeId::new(3)));
        assert_eq!(tree.children(NodeId::new(0)).len(), 3);
    }

    #[test]
    fn test_loop() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let tree = compute_dominators(&graph, NodeId::new(0));
        assert_eq!(tree.immediate_dominator(NodeId::new(2)), Some(NodeId::new(1)));
        assert_eq!(tree.immediate_dominator(NodeId::new(3)), Some(NodeId::new(1)));
        assert_eq!(tree.immediate_dominator(NodeId::new(0)), None);
    }

    #[test]
    fn test_unreachable() {
        let graph = TestGraph::new(3, &[(0, 1), (2, 1)]);
        let tree = compute_dominators(&graph, NodeId::new(0));
        assert!(!tree.is_reachable(NodeId::new(2)));
        assert!(!tree.dominates(NodeId::new(0), NodeId::new(2)));
        assert!(tree.dominates(NodeId::new(0), NodeId::new(1)));
    }
}
