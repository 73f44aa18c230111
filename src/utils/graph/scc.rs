//! Strongly connected components using Tarjan's algorithm.
//!
//! The call graph uses the components to find mutually recursive groups of methods when no
//! leaf is left: a component without edges to other components is a "bottom" group, and
//! removing the outgoing edges of one of its members turns that member into a leaf.

use crate::utils::graph::{NodeId, Successors};

/// Computes the strongly connected components of a directed graph.
///
/// Nodes for which `include` returns `false` are ignored, together with all their edges.
///
/// # Arguments
///
/// * `graph` - The directed graph to analyze
/// * `include` - Filter selecting the nodes that take part
///
/// # Returns
///
/// The components in **reverse topological order**: if there is an edge from component A to
/// component B, B appears before A. The first component is therefore always a bottom
/// component. Members of each component are sorted by node id.
pub fn strongly_connected_components<G, F>(graph: &G, include: F) -> Vec<Vec<NodeId>>
where
    G: Successors,
    F: Fn(NodeId) -> bool,
{
    let node_count = graph.node_count();
    let mut state = TarjanState::new(node_count);

    for i in 0..node_count {
        let node = NodeId::new(i);
        if include(node) && state.index[i].is_none() {
            state.strongconnect(graph, node, &include);
        }
    }

    state.sccs
}

/// Internal state for Tarjan's algorithm.
struct TarjanState {
    /// Discovery index for each node (None if not yet visited)
    index: Vec<Option<usize>>,
    /// Lowlink value for each node
    lowlink: Vec<usize>,
    /// Whether a node is currently on the component stack
    on_stack: Vec<bool>,
    /// The component stack
    stack: Vec<NodeId>,
    /// Current index counter
    current_index: usize,
    /// Collected SCCs
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn visit(&mut self, v: NodeId) {
        self.index[v.index()] = Some(self.current_index);
        self.lowlink[v.index()] = self.current_index;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[v.index()] = true;
    }

    /// Iterative DFS; call chains in real programs are deep enough to overflow the native stack.
    fn strongconnect<G, F>(&mut self, graph: &G, root: NodeId, include: &F)
    where
        G: Successors,
        F: Fn(NodeId) -> bool,
    {
        let mut frames: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();
        self.visit(root);
        frames.push((root, graph.successors(root).filter(|n| include(*n)).collect(), 0));

        while let Some((v, successors, cursor)) = frames.last_mut() {
            let v = *v;
            if let Some(&w) = successors.get(*cursor) {
                *cursor += 1;
                match self.index[w.index()] {
                    None => {
                        self.visit(w);
                        let next = graph.successors(w).filter(|n| include(*n)).collect();
                        frames.push((w, next, 0));
                    }
                    Some(w_index) if self.on_stack[w.index()] => {
                        self.lowlink[v.index()] = self.lowlink[v.index()].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some((parent, _, _)) = frames.last() {
                let parent = *parent;
                self.lowlink[parent.index()] =
                    self.lowlink[parent.index()].min(self.lowlink[v.index()]);
            }

            if Some(self.lowlink[v.index()]) == self.index[v.index()] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.index()] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                scc.sort_unstable();
                self.sccs.push(scc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::tests::TestGraph;

    #[test]
    fn test_scc_cycle() {
        let graph = TestGraph::new(3, &[(0, 1), (1, 2), (2, 0)]);
        let sccs = strongly_connected_components(&graph, |_| true);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0], vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn test_scc_reverse_topological() {
        // 0 -> {1 <-> 2} -> 3
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let sccs = strongly_connected_components(&graph, |_| true);
        assert_eq!(sccs.len(), 3);
        assert_eq!(sccs[0], vec![NodeId::new(3)]);
        assert_eq!(sccs[1], vec![NodeId::new(1), NodeId::new(2)]);
        assert_eq!(sccs[2], vec![NodeId::new(0)]);
    }

    #[test]
    fn test_scc_filter() {
        let graph = TestGraph::new(3, &[(0, 1), (1, 0), (1, 2)]);
        let sccs = strongly_connected_components(&graph, |n| n.index() != 2);
        assert_eq!(sccs, vec![vec![NodeId::new(0), NodeId::new(1)]]);
    }
}
