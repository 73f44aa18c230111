//! Common subexpression elimination.
//!
//! Pure instructions are hashed by operator and operands while walking the dominator tree in
//! preorder. An instruction whose expression is already available from a dominating block (or
//! earlier in the same block) is removed and its uses are redirected to the earlier value.
//! Scopes are popped when the walk leaves a dominator subtree, so an expression is only reused
//! where its first computation dominates.
//!
//! Operands of commutative operators are ordered so that `a + b` and `b + a` share a key.
//! Constants are left to constant splitting, and instructions that may throw are never merged.

use std::collections::HashMap;

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, ValueId},
    compiler::{EventKind, PassContext},
    program::{BinaryOp, NumericType, TypeName, UnaryOp},
    utils::graph::NodeId,
    Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ExprKey {
    Binary(BinaryOp, NumericType, ValueId, ValueId),
    Unary(UnaryOp, ValueId),
    InstanceOf(ValueId, TypeName),
}

impl ExprKey {
    fn of(op: &IrOp, resolve: impl Fn(ValueId) -> ValueId) -> Option<Self> {
        if !op.is_pure() {
            return None;
        }
        match op {
            IrOp::Binary {
                op, ty, left, right, ..
            } => {
                let (mut left, mut right) = (resolve(*left), resolve(*right));
                if op.is_commutative() && right < left {
                    std::mem::swap(&mut left, &mut right);
                }
                Some(ExprKey::Binary(*op, *ty, left, right))
            }
            IrOp::Unary { op, src, .. } => Some(ExprKey::Unary(*op, resolve(*src))),
            IrOp::InstanceOf { value, ty, .. } => {
                Some(ExprKey::InstanceOf(resolve(*value), ty.clone()))
            }
            _ => None,
        }
    }
}

/// Removes recomputations of expressions available from a dominating definition.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let tree = code.dominator_tree();
    let mut available: HashMap<ExprKey, ValueId> = HashMap::new();
    let mut replaced: HashMap<ValueId, ValueId> = HashMap::new();
    let mut removed: Vec<(BlockId, usize)> = Vec::new();

    // Iterative preorder walk; `None` marks the end of a scope.
    let mut scopes: Vec<Vec<ExprKey>> = Vec::new();
    let mut stack: Vec<Option<NodeId>> = vec![Some(NodeId::new(0))];
    while let Some(entry) = stack.pop() {
        let Some(node) = entry else {
            for key in scopes.pop().unwrap_or_default() {
                available.remove(&key);
            }
            continue;
        };
        let block = BlockId::new(node.index());
        let mut scope = Vec::new();
        for (index, op) in code.block(block).instructions.iter().enumerate() {
            let resolve = |v: ValueId| replaced.get(&v).copied().unwrap_or(v);
            let (Some(key), Some(dest)) = (ExprKey::of(op, resolve), op.dest()) else {
                continue;
            };
            match available.get(&key) {
                Some(&existing) => {
                    replaced.insert(dest, existing);
                    removed.push((block, index));
                }
                None => {
                    available.insert(key.clone(), dest);
                    scope.push(key);
                }
            }
        }
        scopes.push(scope);
        stack.push(None);
        for &child in tree.children(node).iter().rev() {
            stack.push(Some(child));
        }
    }

    if removed.is_empty() {
        return Ok(false);
    }
    for &(block, index) in removed.iter().rev() {
        let op = code.block_mut(block).instructions.remove(index);
        ctx.events
            .record(EventKind::SubexpressionEliminated)
            .at(ctx.method.id.clone(), index)
            .message(format!("{op}"))
            .pass("cse");
    }
    code.replace_uses_with(&replaced);
    Ok(true)
}
