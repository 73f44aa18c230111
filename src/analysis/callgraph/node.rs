//! Call graph nodes and edges.

use crate::{analysis::callgraph::CallSite, program::MethodId};

/// A caller to callee edge, one per distinct callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEdge {
    /// Node index of the callee.
    pub callee: usize,
    /// Number of call sites in the caller that may reach the callee.
    pub weight: u32,
    /// Raw instruction index of the first such call site.
    pub first_site: usize,
    /// Set once the edge was removed to break a cycle.
    pub broken: bool,
}

/// A method with code in the call graph.
#[derive(Debug, Clone)]
pub struct CallGraphNode {
    /// The method.
    pub method: MethodId,
    /// Every invoke in the method, in instruction order.
    pub call_sites: Vec<CallSite>,
    /// Outgoing edges ordered by callee index.
    pub(crate) callees: Vec<CallEdge>,
    /// Node indices of the callers, ascending.
    pub(crate) callers: Vec<usize>,
    /// Number of outgoing edges that are neither broken nor point to removed nodes.
    pub(crate) out_degree: usize,
    pub(crate) removed: bool,
}

impl CallGraphNode {
    pub(crate) fn new(method: MethodId, call_sites: Vec<CallSite>) -> Self {
        Self {
            method,
            call_sites,
            callees: Vec::new(),
            callers: Vec::new(),
            out_degree: 0,
            removed: false,
        }
    }

    /// Returns the outgoing edges.
    #[must_use]
    pub fn edges(&self) -> &[CallEdge] {
        &self.callees
    }

    /// Returns `true` if the node was handed out by leaf extraction.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Returns `true` if the method calls nothing in the program.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.callees.is_empty()
    }
}
