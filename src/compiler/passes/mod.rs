//! The IR-to-IR rewrites of the optimization pipeline.
//!
//! Every pass is a function `run(&mut IrCode, &mut PassContext) -> Result<bool>` returning
//! whether it changed the code. [`crate::compiler::PassKind`] dispatches to them in the fixed
//! pipeline order.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`lens`] | Rewrites member references through the graph lens |
//! | [`members`] | Replaces reads of constant static fields by their value |
//! | [`switchmap`] | Switches on enum ordinals instead of switch map lookups |
//! | [`normalize`] | `Long.compare` to `cmp-long`, `requireNonNull` to null checks |
//! | [`cse`] | Dominator scoped common subexpression elimination |
//! | [`arrays`] | `new-array` + constant stores to `filled-new-array` |
//! | [`moveresult`] | Uses the argument a callee is known to return |
//! | [`constants`] | Constant splitting and folding, including branch folding |
//! | [`conditionals`] | Simplifies conditional branches that do not need a comparison |
//! | [`handlers`] | Removes catch handlers that cannot be reached |
//! | [`deadcode`] | Dead code removal to a fixed point and straight-line block merging |
//! | [`liveranges`] | Moves constants next to their only using block |
//! | [`returns`] | Detects methods that always return one of their arguments |
//! | [`logging`] | Prints the arguments on entry |
//!
//! Inlining, outlining and desugaring have their own modules under [`crate::compiler`].

pub mod arrays;
pub mod conditionals;
pub mod constants;
pub mod cse;
pub mod deadcode;
pub mod handlers;
pub mod lens;
pub mod liveranges;
pub mod logging;
pub mod members;
pub mod moveresult;
pub mod normalize;
pub mod returns;
pub mod switchmap;

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, ValueId},
    program::ConstValue,
};

/// Returns the constant each value is defined by, indexed by value.
pub(crate) fn constant_values(code: &IrCode) -> Vec<Option<ConstValue>> {
    let mut values = vec![None; code.value_count()];
    for (_, op) in code.instructions() {
        if let IrOp::Const { dest, value } = op {
            values[dest.index()] = Some(value.clone());
        }
    }
    values
}

/// Returns the integral constant `value` is defined by.
pub(crate) fn int_constant(constants: &[Option<ConstValue>], value: ValueId) -> Option<i64> {
    constants.get(value.index())?.as_ref()?.as_i64()
}

/// Returns the index where instructions can be inserted at the start of `block`, after a
/// leading `MoveException` and after the entry block's arguments.
pub(crate) fn insertion_point(code: &IrCode, block: BlockId) -> usize {
    code.block(block)
        .instructions
        .iter()
        .take_while(|op| matches!(op, IrOp::MoveException { .. } | IrOp::Argument { .. }))
        .count()
}

/// Replaces a conditional terminator of `block` by a `Goto` to `target`, dropping the
/// edges to the other successors.
pub(crate) fn fold_branch(code: &mut IrCode, block: BlockId, target: BlockId) {
    let removed: Vec<BlockId> = code
        .block(block)
        .normal_successors()
        .into_iter()
        .filter(|&s| s != target)
        .collect();
    if let Some(terminator) = code.block_mut(block).terminator_mut() {
        *terminator = IrOp::Goto { target };
    }
    for succ in removed {
        if !code.block(block).catch_handlers.iter().any(|h| h.target == succ) {
            code.remove_predecessor(succ, block);
        }
    }
}
