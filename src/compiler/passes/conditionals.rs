//! Conditional branch simplification.
//!
//! - a comparison of a value with itself is decided statically;
//! - a comparison against a constant zero or null uses the compare-with-zero form, with a
//!   constant left operand swapped to the right first;
//! - a branch whose two successors are the same block becomes a `goto`;
//! - a null test of a freshly allocated object or array is decided statically.

use crate::{
    analysis::ir::{BlockId, DefSite, IrCode, IrOp, ValueId},
    compiler::{
        passes::{constant_values, fold_branch},
        EventKind, PassContext,
    },
    program::{ConstValue, IfCond},
    Result,
};

enum Rewrite {
    Fold(BlockId),
    Replace(IrOp),
}

fn is_zero_constant(constants: &[Option<ConstValue>], value: ValueId) -> bool {
    constants[value.index()]
        .as_ref()
        .is_some_and(ConstValue::is_zero)
}

fn is_allocation(code: &IrCode, defs: &[Option<DefSite>], value: ValueId) -> bool {
    let Some(DefSite::Instruction(block, index)) = defs[value.index()] else {
        return false;
    };
    matches!(
        code.block(block).instructions[index],
        IrOp::NewInstance { .. } | IrOp::NewArray { .. } | IrOp::FilledNewArray { .. }
    )
}

fn simplify(
    code: &IrCode,
    constants: &[Option<ConstValue>],
    defs: &[Option<DefSite>],
    branch: &IrOp,
) -> Option<Rewrite> {
    let IrOp::If {
        cond,
        left,
        right,
        then_block,
        else_block,
    } = branch
    else {
        return None;
    };
    let (cond, left, right, then_block, else_block) =
        (*cond, *left, *right, *then_block, *else_block);

    if then_block == else_block {
        return Some(Rewrite::Fold(then_block));
    }
    let decide = |taken: bool| Rewrite::Fold(if taken { then_block } else { else_block });

    match right {
        Some(right) if right == left => Some(decide(cond.evaluate(0, 0))),
        Some(right) if is_zero_constant(constants, right) => Some(Rewrite::Replace(IrOp::If {
            cond,
            left,
            right: None,
            then_block,
            else_block,
        })),
        Some(right) if is_zero_constant(constants, left) => Some(Rewrite::Replace(IrOp::If {
            cond: cond.swapped(),
            left: right,
            right: None,
            then_block,
            else_block,
        })),
        None if matches!(cond, IfCond::Eq | IfCond::Ne) && is_allocation(code, defs, left) => {
            Some(decide(cond == IfCond::Ne))
        }
        _ => None,
    }
}

/// Simplifies conditional branches.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let constants = constant_values(code);
    let defs = code.definitions();
    let mut changed = false;
    let mut folded = false;

    for block in code.block_ids().collect::<Vec<_>>() {
        let Some(rewrite) = code
            .block(block)
            .terminator()
            .and_then(|t| simplify(code, &constants, &defs, t))
        else {
            continue;
        };
        match rewrite {
            Rewrite::Fold(target) => {
                ctx.events
                    .record(EventKind::BranchSimplified)
                    .at(ctx.method.id.clone(), block.index())
                    .message(format!("{block} always branches to {target}"))
                    .pass("conditionals");
                fold_branch(code, block, target);
                folded = true;
            }
            Rewrite::Replace(branch) => {
                ctx.events
                    .record(EventKind::BranchSimplified)
                    .at(ctx.method.id.clone(), block.index())
                    .message(format!("{branch}"))
                    .pass("conditionals");
                if let Some(terminator) = code.block_mut(block).terminator_mut() {
                    *terminator = branch;
                }
            }
        }
        changed = true;
    }

    if folded {
        code.remove_unreachable_blocks();
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        compiler::{CompilerOptions, EventLog},
        program::{EncodedMethod, TypeName},
        test::{method_from, program_with},
    };

    fn optimize(method: &EncodedMethod) -> (IrCode, bool) {
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, method, &events);
        let mut code = RegisterIrBuilder.build_ir(method).unwrap().unwrap();
        let changed = run(&mut code, &mut ctx).unwrap();
        code.verify_ssa().unwrap();
        (code, changed)
    }

    fn branch(code: &IrCode) -> Option<&IrOp> {
        code.instructions()
            .map(|(_, op)| op)
            .find(|op| matches!(op, IrOp::If { .. }))
    }

    #[test]
    fn test_compare_with_itself() {
        let method = method_from("p.A.f(int)int", 1, |asm| {
            let other = asm.new_label();
            asm.if_cmp(IfCond::Le, 0, 0, other)
                .return_value(0)
                .bind(other)
                .const_int(0, 1)
                .return_value(0);
        });
        let (code, changed) = optimize(&method);
        assert!(changed);
        assert!(branch(&code).is_none());
        assert_eq!(code.block_count(), 3);
    }

    #[test]
    fn test_zero_on_left_swapped() {
        let method = method_from("p.A.f(int)int", 2, |asm| {
            let other = asm.new_label();
            asm.const_int(1, 0)
                .if_cmp(IfCond::Lt, 1, 0, other)
                .return_value(0)
                .bind(other)
                .return_value(1);
        });
        let (code, changed) = optimize(&method);
        assert!(changed);
        assert!(matches!(
            branch(&code),
            Some(IrOp::If {
                cond: IfCond::Gt,
                right: None,
                ..
            })
        ));
    }

    #[test]
    fn test_new_instance_is_not_null() {
        let method = method_from("p.A.f()int", 2, |asm| {
            let null = asm.new_label();
            asm.new_instance(0, TypeName::object())
                .if_zero(IfCond::Eq, 0, null)
                .const_int(1, 1)
                .return_value(1)
                .bind(null)
                .const_int(1, 0)
                .return_value(1);
        });
        let (code, changed) = optimize(&method);
        assert!(changed);
        assert!(branch(&code).is_none());
        assert!(!code.instructions().any(|(_, op)| matches!(
            op,
            IrOp::Const {
                value: ConstValue::Int(0),
                ..
            }
        )));
    }

    #[test]
    fn test_unknown_operands_kept() {
        let method = method_from("p.A.f(int,int)int", 2, |asm| {
            let other = asm.new_label();
            asm.if_cmp(IfCond::Lt, 0, 1, other)
                .return_value(0)
                .bind(other)
                .return_value(1);
        });
        let (_, changed) = optimize(&method);
        assert!(!changed);
    }
}
