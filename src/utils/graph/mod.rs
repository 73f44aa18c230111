//! Generic directed graph algorithms.
//!
//! The algorithms work on anything implementing [`Successors`]: the call graph exposes its
//! remaining (not yet extracted) methods this way, and [`crate::analysis::IrCode`] exposes its
//! control flow graph.
//!
//! | Algorithm | Time Complexity | Used by |
//! |-----------|-----------------|---------|
//! | [`strongly_connected_components`] | O(V + E) | call graph cycle breaking |
//! | [`compute_dominators`] | O(V + E) per iteration | SSA verification, CSE |
//! | [`reverse_postorder`] | O(V + E) | SSA construction, block linearization |

mod dominators;
mod scc;
mod traversal;

use std::fmt;

pub use dominators::{compute_dominators, DominatorTree};
pub use scc::strongly_connected_components;
pub use traversal::reverse_postorder;

/// A strongly-typed identifier for nodes within a directed graph.
///
/// Node IDs are dense indices starting at 0, suitable for indexing per-node vectors.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Read access to the forward edges of a graph with dense node ids.
pub trait Successors {
    /// Returns the number of nodes; valid ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Returns the direct successors of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{NodeId, Successors};

    /// Adjacency list graph used by the algorithm tests.
    pub struct TestGraph {
        pub edges: Vec<Vec<usize>>,
    }

    impl TestGraph {
        pub fn new(node_count: usize, edges: &[(usize, usize)]) -> Self {
            let mut adjacency = vec![Vec::new(); node_count];
            for &(from, to) in edges {
                adjacency[from].push(to);
            }
            Self { edges: adjacency }
        }
    }

    impl Successors for TestGraph {
        fn node_count(&self) -> usize {
            self.edges.len()
        }

        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
            self.edges[node.index()].iter().map(|&n| NodeId::new(n))
        }
    }
}
