//! Small shared building blocks: bit sets, graph algorithms and DOT escaping.

mod bitset;
mod dot;
pub mod graph;

pub use bitset::BitSet;
pub use dot::escape_dot;
