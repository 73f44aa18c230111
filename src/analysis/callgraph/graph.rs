//! Call graph construction and leaf extraction.
//!
//! The graph is an arena of [`CallGraphNode`]s indexed by position; edges are stored as
//! adjacency lists keyed by node index. Leaf extraction peels nodes whose outgoing edges all
//! lead to already removed nodes (Kahn's algorithm, one layer per call). When every remaining
//! node still has a callee the remaining nodes form cycles; the graph then breaks the cheapest
//! cycle it can find and reports the batch as cycle-broken.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use crate::{
    analysis::{
        callgraph::{CallEdge, CallGraphNode, CallSite, CallTarget},
        GraphLens,
    },
    program::{EncodedMethod, InvokeKind, MethodId, Program},
    utils::{
        escape_dot,
        graph::{strongly_connected_components, NodeId, Successors},
    },
    Result,
};

/// Inter-procedural call graph over the methods of a [`Program`].
///
/// # Example
///
/// ```rust
/// use dexopt::analysis::{CallGraph, GraphLens};
/// use dexopt::program::Program;
///
/// let program = Program::new();
/// let mut graph = CallGraph::build(&program, &GraphLens::identity());
/// assert!(graph.is_empty());
/// assert!(graph.pick_leaves()?.is_empty());
/// # Ok::<(), dexopt::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct CallGraph {
    /// Nodes in program order.
    nodes: Vec<CallGraphNode>,
    /// Map from method to node index for O(1) lookup.
    index: HashMap<MethodId, usize>,
    /// Number of nodes not yet handed out.
    remaining: usize,
}

/// One batch of methods returned by [`CallGraph::pick_leaves`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Leaves {
    methods: Vec<MethodId>,
    broke_cycles: bool,
}

impl Leaves {
    /// Returns the methods in program order.
    #[must_use]
    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    /// Returns `true` if edges were removed to produce this batch. Such a batch must be
    /// processed sequentially.
    #[must_use]
    pub fn broke_cycles(&self) -> bool {
        self.broke_cycles
    }

    /// Returns the number of methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl IntoIterator for Leaves {
    type Item = MethodId;
    type IntoIter = std::vec::IntoIter<MethodId>;

    fn into_iter(self) -> Self::IntoIter {
        self.methods.into_iter()
    }
}

/// The remaining nodes and their live edges, for cycle detection.
struct LiveEdges<'a>(&'a CallGraph);

impl Successors for LiveEdges<'_> {
    fn node_count(&self) -> usize {
        self.0.nodes.len()
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.0.nodes[node.index()]
            .callees
            .iter()
            .filter(|e| !e.broken && !self.0.nodes[e.callee].removed)
            .map(|e| NodeId::new(e.callee))
    }
}

impl CallGraph {
    /// Builds the call graph of every method with code.
    ///
    /// Invoke targets are rewritten through `lens` and resolved with class hierarchy
    /// analysis: static, direct and super invokes to the definition found on the superclass
    /// chain, virtual and interface invokes additionally to every overriding method.
    #[must_use]
    pub fn build(program: &Program, lens: &GraphLens) -> Self {
        Self::build_filtered(program, lens, |_| true)
    }

    /// Builds the call graph of the methods with code for which `include` returns `true`.
    /// Calls to excluded methods produce no edges.
    pub fn build_filtered<F>(program: &Program, lens: &GraphLens, include: F) -> Self
    where
        F: Fn(&EncodedMethod) -> bool,
    {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        // First pass: one node per method with code
        for method in program.methods() {
            let Some(code) = &method.code else {
                continue;
            };
            if method.is_abstract_or_native() || !include(method) {
                continue;
            }
            let call_sites = code
                .invokes()
                .map(|(offset, kind, target)| {
                    CallSite::new(offset, kind, Self::resolve(program, kind, &lens.lookup_method(target)))
                })
                .collect();
            index.insert(method.id.clone(), nodes.len());
            nodes.push(CallGraphNode::new(method.id.clone(), call_sites));
        }

        // Second pass: weighted edges, one per distinct callee
        for caller in 0..nodes.len() {
            let mut edges: BTreeMap<usize, CallEdge> = BTreeMap::new();
            for site in &nodes[caller].call_sites {
                for target in site.target.all_targets() {
                    let Some(&callee) = index.get(&target) else {
                        continue;
                    };
                    edges
                        .entry(callee)
                        .and_modify(|e| e.weight += 1)
                        .or_insert(CallEdge {
                            callee,
                            weight: 1,
                            first_site: site.offset,
                            broken: false,
                        });
                }
            }
            for &callee in edges.keys() {
                nodes[callee].callers.push(caller);
            }
            nodes[caller].out_degree = edges.len();
            nodes[caller].callees = edges.into_values().collect();
        }

        let remaining = nodes.len();
        Self {
            nodes,
            index,
            remaining,
        }
    }

    fn resolve(program: &Program, kind: InvokeKind, method: &MethodId) -> CallTarget {
        let mut targets = program.possible_targets(kind, method);
        match targets.len() {
            0 => CallTarget::External(method.clone()),
            1 => CallTarget::Resolved(targets.remove(0)),
            _ => CallTarget::Virtual {
                declared: method.clone(),
                possible_targets: targets,
            },
        }
    }

    /// Returns `true` once every node has been handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Returns the total number of nodes, removed ones included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of nodes not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Returns `true` if `method` is a node of the graph.
    #[must_use]
    pub fn contains(&self, method: &MethodId) -> bool {
        self.index.contains_key(method)
    }

    /// Returns the node of `method`.
    #[must_use]
    pub fn node(&self, method: &MethodId) -> Option<&CallGraphNode> {
        self.index.get(method).map(|&i| &self.nodes[i])
    }

    /// Iterates the nodes in program order.
    pub fn nodes(&self) -> impl Iterator<Item = &CallGraphNode> {
        self.nodes.iter()
    }

    /// Returns the methods called by `caller`, in node order.
    #[must_use]
    pub fn callees(&self, caller: &MethodId) -> Vec<MethodId> {
        self.node(caller)
            .map(|node| {
                node.callees
                    .iter()
                    .map(|e| self.nodes[e.callee].method.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the methods calling `callee`, in node order.
    #[must_use]
    pub fn callers(&self, callee: &MethodId) -> Vec<MethodId> {
        self.node(callee)
            .map(|node| {
                node.callers
                    .iter()
                    .map(|&c| self.nodes[c].method.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the call sites of `method`.
    #[must_use]
    pub fn call_sites(&self, method: &MethodId) -> &[CallSite] {
        self.node(method).map_or(&[], |n| n.call_sites.as_slice())
    }

    /// Returns `true` if the edge `caller -> callee` was removed to break a cycle.
    #[must_use]
    pub fn is_breaker(&self, caller: &MethodId, callee: &MethodId) -> bool {
        let (Some(&from), Some(&to)) = (self.index.get(caller), self.index.get(callee)) else {
            return false;
        };
        self.nodes[from]
            .callees
            .iter()
            .any(|e| e.callee == to && e.broken)
    }

    /// Removes and returns the next batch of methods without unprocessed callees.
    ///
    /// If every remaining method still has a callee, the outgoing edges of one method in a
    /// bottom strongly connected component are broken first: the member with the smallest
    /// total outgoing call-site weight, lowest index on ties. The returned batch is then
    /// flagged with [`Leaves::broke_cycles`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CallGraph`] if no leaf can be produced, which means the graph
    /// state is corrupt.
    pub fn pick_leaves(&mut self) -> Result<Leaves> {
        if self.is_empty() {
            return Ok(Leaves::default());
        }

        let mut leaves = self.current_leaves();
        let mut broke_cycles = false;
        if leaves.is_empty() {
            self.break_cycle()?;
            broke_cycles = true;
            leaves = self.current_leaves();
            if leaves.is_empty() {
                return Err(crate::Error::CallGraph(format!(
                    "no leaf after breaking cycles, {} methods remain",
                    self.remaining
                )));
            }
        }

        for &leaf in &leaves {
            self.remove(leaf);
        }
        Ok(Leaves {
            methods: leaves
                .into_iter()
                .map(|i| self.nodes[i].method.clone())
                .collect(),
            broke_cycles,
        })
    }

    fn current_leaves(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.removed && n.out_degree == 0)
            .map(|(i, _)| i)
            .collect()
    }

    fn remove(&mut self, node: usize) {
        self.nodes[node].removed = true;
        self.remaining -= 1;
        for caller in self.nodes[node].callers.clone() {
            if self.nodes[caller].removed {
                continue;
            }
            let live = self.nodes[caller]
                .callees
                .iter()
                .any(|e| e.callee == node && !e.broken);
            if live {
                self.nodes[caller].out_degree -= 1;
            }
        }
    }

    fn break_cycle(&mut self) -> Result<()> {
        let components = strongly_connected_components(&LiveEdges(self), |n| {
            !self.nodes[n.index()].removed
        });

        let mut component_of = vec![usize::MAX; self.nodes.len()];
        for (c, members) in components.iter().enumerate() {
            for member in members {
                component_of[member.index()] = c;
            }
        }

        let live = LiveEdges(self);
        let mut best: Option<(u64, usize)> = None;
        for (c, members) in components.iter().enumerate() {
            let is_bottom = members.iter().all(|&m| {
                live.successors(m)
                    .all(|succ| component_of[succ.index()] == c)
            });
            if !is_bottom {
                continue;
            }
            for &member in members {
                let weight: u64 = self.nodes[member.index()]
                    .callees
                    .iter()
                    .filter(|e| !e.broken && !self.nodes[e.callee].removed)
                    .map(|e| u64::from(e.weight))
                    .sum();
                let candidate = (weight, member.index());
                if best.map_or(true, |b| candidate < b) {
                    best = Some(candidate);
                }
            }
        }

        let Some((weight, breaker)) = best else {
            return Err(crate::Error::CallGraph(format!(
                "no bottom component among {} remaining methods",
                self.remaining
            )));
        };
        log::debug!(
            "breaking call cycle at {} (outgoing weight {})",
            self.nodes[breaker].method,
            weight
        );

        let removed: Vec<bool> = self.nodes.iter().map(|n| n.removed).collect();
        let node = &mut self.nodes[breaker];
        for edge in &mut node.callees {
            if !edge.broken && !removed[edge.callee] {
                edge.broken = true;
                node.out_degree -= 1;
            }
        }
        Ok(())
    }

    /// Returns summary statistics.
    #[must_use]
    pub fn stats(&self) -> CallGraphStats {
        let sites = || self.nodes.iter().flat_map(|n| &n.call_sites);
        CallGraphStats {
            method_count: self.nodes.len(),
            edge_count: self.nodes.iter().map(|n| n.callees.len()).sum(),
            total_call_sites: sites().count(),
            virtual_calls: sites()
                .filter(|s| matches!(s.kind, InvokeKind::Virtual | InvokeKind::Interface))
                .count(),
            resolved_calls: sites().filter(|s| s.target.is_resolved()).count(),
            polymorphic_calls: sites().filter(|s| s.is_polymorphic()).count(),
            broken_edges: self
                .nodes
                .iter()
                .flat_map(|n| &n.callees)
                .filter(|e| e.broken)
                .count(),
            remaining: self.remaining,
        }
    }

    /// Renders the graph in DOT format. Removed nodes are grey, broken edges dashed.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph CallGraph {\n");
        let _ = writeln!(
            dot,
            "    label=\"{}\";",
            escape_dot(title.unwrap_or("Call Graph"))
        );
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    rankdir=TB;\n\n");

        for (i, node) in self.nodes.iter().enumerate() {
            let style = if node.removed {
                ", style=filled, fillcolor=lightgrey"
            } else if node.is_leaf() {
                ", style=filled, fillcolor=lightblue"
            } else {
                ""
            };
            let _ = writeln!(
                dot,
                "    n{i} [label=\"{}\"{style}];",
                escape_dot(&node.method.to_string())
            );
        }
        dot.push('\n');
        for (i, node) in self.nodes.iter().enumerate() {
            for edge in &node.callees {
                let style = if edge.broken { " [style=dashed]" } else { "" };
                let _ = writeln!(dot, "    n{i} -> n{}{style};", edge.callee);
            }
        }
        dot.push_str("}\n");
        dot
    }
}

/// Summary statistics of a [`CallGraph`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallGraphStats {
    /// Number of methods
    pub method_count: usize,
    /// Number of distinct caller/callee pairs
    pub edge_count: usize,
    /// Number of invoke instructions
    pub total_call_sites: usize,
    /// Virtual and interface invokes
    pub virtual_calls: usize,
    /// Invokes with at least one program target
    pub resolved_calls: usize,
    /// Invokes with more than one program target
    pub polymorphic_calls: usize,
    /// Edges removed to break cycles so far
    pub broken_edges: usize,
    /// Methods not yet handed out
    pub remaining: usize,
}

impl CallGraphStats {
    /// Returns the percentage of call sites with a program target.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn resolution_rate(&self) -> f64 {
        if self.total_call_sites == 0 {
            100.0
        } else {
            (self.resolved_calls as f64 / self.total_call_sites as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{program_with, static_method};

    #[test]
    fn test_chain_is_peeled_bottom_up() {
        let program = program_with(vec![
            static_method("p.A.top()void", &["p.A.mid()void"]),
            static_method("p.A.mid()void", &["p.A.leaf()void"]),
            static_method("p.A.leaf()void", &[]),
        ]);
        let mut graph = CallGraph::build(&program, &GraphLens::identity());

        let mut order = Vec::new();
        while !graph.is_empty() {
            let leaves = graph.pick_leaves().unwrap();
            assert!(!leaves.broke_cycles());
            order.push(
                leaves
                    .methods()
                    .iter()
                    .map(|m| m.name.to_string())
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(order, vec![vec!["leaf"], vec!["mid"], vec!["top"]]);
    }

    #[test]
    fn test_cycle_broken_at_lightest_node() {
        // a -> b (twice), b -> a (once): b has the smaller outgoing weight.
        let program = program_with(vec![
            static_method("p.A.a()void", &["p.A.b()void", "p.A.b()void"]),
            static_method("p.A.b()void", &["p.A.a()void"]),
        ]);
        let mut graph = CallGraph::build(&program, &GraphLens::identity());
        let a = MethodId::parse("p.A.a()void").unwrap();
        let b = MethodId::parse("p.A.b()void").unwrap();

        let first = graph.pick_leaves().unwrap();
        assert!(first.broke_cycles());
        assert_eq!(first.methods(), &[b.clone()]);
        assert!(graph.is_breaker(&b, &a));
        assert!(!graph.is_breaker(&a, &b));

        let second = graph.pick_leaves().unwrap();
        assert!(!second.broke_cycles());
        assert_eq!(second.methods(), &[a]);
        assert!(graph.is_empty());
        assert_eq!(graph.stats().broken_edges, 1);
    }

    #[test]
    fn test_self_recursion() {
        let program = program_with(vec![static_method("p.A.r()void", &["p.A.r()void"])]);
        let mut graph = CallGraph::build(&program, &GraphLens::identity());
        let leaves = graph.pick_leaves().unwrap();
        assert!(leaves.broke_cycles());
        assert_eq!(leaves.len(), 1);
    }

    #[test]
    fn test_lens_redirects_edges() {
        let program = program_with(vec![
            static_method("p.A.caller()void", &["p.A.old()void"]),
            static_method("p.A.new()void", &[]),
        ]);
        let lens = GraphLens::builder()
            .map_method(
                MethodId::parse("p.A.old()void").unwrap(),
                MethodId::parse("p.A.new()void").unwrap(),
            )
            .build(&GraphLens::identity());
        let graph = CallGraph::build(&program, &lens);
        let caller = MethodId::parse("p.A.caller()void").unwrap();
        assert_eq!(
            graph.callees(&caller),
            vec![MethodId::parse("p.A.new()void").unwrap()]
        );
        assert_eq!(graph.stats().resolved_calls, 1);
        assert!(graph.to_dot(None).contains("n0 -> n1"));
    }

    #[test]
    fn test_stats_resolution_rate() {
        let mut stats = CallGraphStats::default();
        assert!((stats.resolution_rate() - 100.0).abs() < f64::EPSILON);
        stats.total_call_sites = 10;
        stats.resolved_calls = 8;
        assert!((stats.resolution_rate() - 80.0).abs() < f64::EPSILON);
    }
}
