//! Inter-procedural call graph and leaf scheduling.
//!
//! The call graph is built by scanning method bodies for invoke instructions and resolving
//! their targets through the current [`crate::analysis::GraphLens`]. For virtual calls, class
//! hierarchy analysis adds every overriding method of a program subtype.
//!
//! The converter consumes the graph destructively: [`CallGraph::pick_leaves`] hands out the
//! methods whose callees have all been handed out before, so that callees are optimized
//! before their callers. Mutual recursion is resolved by breaking edges, which the batch
//! reports so that it can be processed sequentially.
//!
//! # Components
//!
//! - [`CallGraph`]: the arena of nodes with weighted edges
//! - [`CallGraphNode`] / [`CallEdge`]: a method and its distinct callees
//! - [`CallSite`] / [`CallTarget`]: one invoke and its resolved target(s)
//! - [`Leaves`]: one batch returned by leaf extraction

mod graph;
mod node;
mod site;

pub use graph::{CallGraph, CallGraphStats, Leaves};
pub use node::{CallEdge, CallGraphNode};
pub use site::{CallSite, CallTarget};
