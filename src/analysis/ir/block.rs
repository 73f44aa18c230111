//! Basic blocks and phi functions.

use crate::{
    analysis::ir::{BlockId, IrOp, ValueId},
    program::TypeName,
};

/// A phi function: `dest` takes the operand matching the predecessor control came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// The defined value
    pub dest: ValueId,
    /// One operand per predecessor, in predecessor order
    pub operands: Vec<ValueId>,
}

/// An exceptional successor of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandler {
    /// The caught type, `None` for catch-all
    pub guard: Option<TypeName>,
    /// The handler block
    pub target: BlockId,
}

/// A basic block.
///
/// The last instruction is the terminator. A block with catch handlers has at most one
/// throwing instruction, placed right before the terminator (or being the terminator, for
/// `Throw`); its exceptional successors see the values as they were before that instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicBlock {
    /// Phi functions, executed in parallel on block entry
    pub phis: Vec<Phi>,
    /// Instructions, terminator last
    pub instructions: Vec<IrOp>,
    /// Predecessors, normal and exceptional, each at most once
    pub predecessors: Vec<BlockId>,
    /// Exceptional successors in match order
    pub catch_handlers: Vec<CatchHandler>,
}

impl BasicBlock {
    /// Returns the terminator, if the block has one.
    #[must_use]
    pub fn terminator(&self) -> Option<&IrOp> {
        self.instructions.last().filter(|op| op.is_terminator())
    }

    /// Returns the terminator mutably.
    pub fn terminator_mut(&mut self) -> Option<&mut IrOp> {
        self.instructions.last_mut().filter(|op| op.is_terminator())
    }

    /// Returns the normal successors.
    #[must_use]
    pub fn normal_successors(&self) -> Vec<BlockId> {
        self.terminator().map(IrOp::successors).unwrap_or_default()
    }

    /// Returns all successors, normal first, each at most once.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        let mut result = self.normal_successors();
        for handler in &self.catch_handlers {
            if !result.contains(&handler.target) {
                result.push(handler.target);
            }
        }
        result
    }

    /// Returns `true` if `target` is reached from this block only exceptionally.
    #[must_use]
    pub fn is_exceptional_successor(&self, target: BlockId) -> bool {
        self.catch_handlers.iter().any(|h| h.target == target)
            && !self.normal_successors().contains(&target)
    }

    /// Returns the index of the instruction whose exception reaches the catch handlers.
    #[must_use]
    pub fn throwing_index(&self) -> Option<usize> {
        if self.catch_handlers.is_empty() {
            return None;
        }
        self.instructions.iter().rposition(IrOp::can_throw)
    }

    /// Returns the index of `pred` in the predecessor list.
    #[must_use]
    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.predecessors.iter().position(|&p| p == pred)
    }

    /// Iterates the non-terminator instructions.
    pub fn body(&self) -> impl Iterator<Item = &IrOp> {
        let end = if self.terminator().is_some() {
            self.instructions.len() - 1
        } else {
            self.instructions.len()
        };
        self.instructions[..end].iter()
    }
}
