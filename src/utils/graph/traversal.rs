//! Depth-first orderings.

use crate::utils::graph::{NodeId, Successors};

/// Computes the postorder of the nodes reachable from `start`.
///
/// Successors are visited in the order the graph reports them, which makes the result
/// deterministic for a deterministic graph.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `start` - The starting node for traversal
///
/// # Returns
///
/// A vector of `NodeId` in postorder; empty if `start` is out of range.
#[allow(clippy::items_after_statements)]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut stack = vec![(start, State::Enter)];
    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Computes the reverse postorder of the nodes reachable from `start`.
///
/// In reverse postorder every node comes before its successors, back edges excepted; this is
/// the order used to linearize blocks for register allocation.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::tests::TestGraph;

    #[test]
    fn test_postorder_linear() {
        let graph = TestGraph::new(3, &[(0, 1), (1, 2)]);
        let order = postorder(&graph, NodeId::new(0));
        assert_eq!(order, vec![NodeId::new(2), NodeId::new(1), NodeId::new(0)]);
    }

    #[test]
    fn test_reverse_postorder_diamond() {
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let order = reverse_postorder(&graph, NodeId::new(0));
        assert_eq!(order.first(), Some(&NodeId::new(0)));
        assert_eq!(order.last(), Some(&NodeId::new(3)));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_invalid_start() {
        let graph = TestGraph::new(1, &[]);
        assert!(postorder(&graph, NodeId::new(5)).is_empty());
    }
}
