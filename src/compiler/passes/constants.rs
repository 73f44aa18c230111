//! Constant splitting and folding.
//!
//! [`split`] gives every block that reads a constant defined elsewhere its own copy right
//! before the first read, so a constant does not stay live across the method. The original
//! definition keeps feeding phis and its own block; it is removed by dead code elimination
//! once nothing reads it.
//!
//! [`fold`] evaluates arithmetic on constant operands and resolves branches and switches on
//! constants, then drops the blocks that became unreachable. It runs to a fixed point, so
//! chains of constant arithmetic fold completely.

use std::collections::HashMap;

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, ValueId},
    compiler::{
        passes::{constant_values, fold_branch, insertion_point},
        EventKind, PassContext,
    },
    program::{ConstValue, ValueType},
    Result,
};

/// Rematerializes constants in every block that uses them.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn split(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let constants = constant_values(code);
    let defs = code.definitions();

    // (using block, constant) -> index of the first use in that block
    let mut first_uses: Vec<(BlockId, ValueId, usize)> = Vec::new();
    for b in code.block_ids() {
        let mut seen: HashMap<ValueId, usize> = HashMap::new();
        for (index, op) in code.block(b).instructions.iter().enumerate() {
            op.for_each_use(|v| {
                let splittable = matches!(
                    constants[v.index()],
                    Some(ref value) if !matches!(value, ConstValue::Type(_))
                );
                let elsewhere = defs[v.index()].is_some_and(|site| site.block() != b);
                if splittable && elsewhere {
                    seen.entry(v).or_insert(index);
                }
            });
        }
        let mut uses: Vec<(ValueId, usize)> = seen.into_iter().collect();
        uses.sort_by_key(|&(v, index)| (index, v));
        first_uses.extend(uses.into_iter().map(|(v, index)| (b, v, index)));
    }
    if first_uses.is_empty() {
        return Ok(false);
    }

    // Insert back to front so earlier indices stay valid.
    first_uses.sort_by(|a, b| a.0.cmp(&b.0).then(b.2.cmp(&a.2)).then(b.1.cmp(&a.1)));
    for (block, value, index) in first_uses {
        let Some(constant) = constants[value.index()].clone() else {
            continue;
        };
        let copy = code.new_value(code.value_type(value));
        let at = index.max(insertion_point(code, block));
        let instructions = &mut code.block_mut(block).instructions;
        for op in instructions.iter_mut().skip(at) {
            op.for_each_use_mut(|v| {
                if *v == value {
                    *v = copy;
                }
            });
        }
        instructions.insert(
            at,
            IrOp::Const {
                dest: copy,
                value: constant,
            },
        );
        ctx.events
            .record(EventKind::LiveRangeShortened)
            .at(ctx.method.id.clone(), at)
            .message(format!("{copy} <- copy of {value} in {block}"))
            .pass("constant-splitting");
    }
    Ok(true)
}

/// Integral value of a constant as seen by a branch; `null` compares as zero.
fn branch_value(constants: &[Option<ConstValue>], value: ValueId) -> Option<i64> {
    match constants.get(value.index())?.as_ref()? {
        ConstValue::Null => Some(0),
        other => other.as_i64(),
    }
}

fn folded(ty: ValueType, value: i64) -> ConstValue {
    match ty {
        ValueType::Long => ConstValue::Long(value),
        _ => ConstValue::Int(value as i32),
    }
}

/// Folds constant arithmetic and constant branches.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn fold(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let mut constants = constant_values(code);
    let mut changed = false;
    let mut branches_folded = false;

    loop {
        let mut progress = false;
        for block in code.reverse_postorder() {
            for index in 0..code.block(block).instructions.len() {
                let op = &code.block(block).instructions[index];
                let replacement = match op {
                    IrOp::Binary {
                        op,
                        ty,
                        dest,
                        left,
                        right,
                    } => {
                        let (Some(l), Some(r)) = (
                            branch_value(&constants, *left),
                            branch_value(&constants, *right),
                        ) else {
                            continue;
                        };
                        op.fold(*ty, l, r)
                            .map(|v| (*dest, folded(code.value_type(*dest), v)))
                    }
                    IrOp::Unary { op, dest, src } => branch_value(&constants, *src).map(|v| {
                        let v = op.fold(v, code.value_type(*src));
                        (*dest, folded(code.value_type(*dest), v))
                    }),
                    _ => None,
                };
                let Some((dest, value)) = replacement else {
                    continue;
                };
                ctx.events
                    .record(EventKind::ConstantFolded)
                    .at(ctx.method.id.clone(), index)
                    .message(format!("{} -> {value}", code.block(block).instructions[index]))
                    .pass("constant-folding");
                constants[dest.index()] = Some(value.clone());
                code.block_mut(block).instructions[index] = IrOp::Const { dest, value };
                progress = true;
            }

            let target = match code.block(block).terminator() {
                Some(IrOp::If {
                    cond,
                    left,
                    right,
                    then_block,
                    else_block,
                }) => {
                    let l = branch_value(&constants, *left);
                    let r = match right {
                        Some(right) => branch_value(&constants, *right),
                        None => Some(0),
                    };
                    match (l, r) {
                        (Some(l), Some(r)) if cond.evaluate(l, r) => Some(*then_block),
                        (Some(_), Some(_)) => Some(*else_block),
                        _ => None,
                    }
                }
                Some(IrOp::Switch {
                    value,
                    keys,
                    targets,
                    fallthrough,
                }) => branch_value(&constants, *value).map(|v| {
                    keys.iter()
                        .position(|&k| i64::from(k) == v)
                        .map_or(*fallthrough, |i| targets[i])
                }),
                _ => None,
            };
            if let Some(target) = target {
                ctx.events
                    .record(EventKind::BranchSimplified)
                    .at(ctx.method.id.clone(), block.index())
                    .message(format!("{block} always branches to {target}"))
                    .pass("constant-folding");
                fold_branch(code, block, target);
                branches_folded = true;
                progress = true;
            }
        }
        if !progress {
            break;
        }
        changed = true;
    }

    if branches_folded {
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
        program::{BinaryOp, EncodedMethod, IfCond, NumericType},
        test::{method_from, program_with},
    };

    fn apply(
        method: &EncodedMethod,
        pass: fn(&mut IrCode, &mut PassContext<'_>) -> Result<bool>,
    ) -> (IrCode, bool, EventLog) {
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut code = RegisterIrBuilder.build_ir(method).unwrap().unwrap();
        let changed = {
            let mut ctx = PassContext::new(&program, &options, method, &events);
            pass(&mut code, &mut ctx).unwrap()
        };
        code.verify_ssa().unwrap();
        (code, changed, events)
    }

    fn consts(code: &IrCode) -> Vec<ConstValue> {
        code.instructions()
            .filter_map(|(_, op)| match op {
                IrOp::Const { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_arithmetic_chain_folded() {
        let method = method_from("p.A.f()int", 3, |asm| {
            asm.const_int(0, 6)
                .const_int(1, 7)
                .mul_int(2, 0, 1)
                .add_int(2, 2, 0)
                .return_value(2);
        });
        let (code, changed, events) = apply(&method, fold);
        assert!(changed);
        assert!(consts(&code).contains(&ConstValue::Int(48)));
        assert!(!code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::Binary { .. })));
        assert_eq!(events.count_kind(EventKind::ConstantFolded), 2);
    }

    #[test]
    fn test_division_by_zero_kept() {
        let method = method_from("p.A.f()int", 3, |asm| {
            asm.const_int(0, 1)
                .const_int(1, 0)
                .binary(BinaryOp::Div, NumericType::Int, 2, 0, 1)
                .return_value(2);
        });
        let (_, changed, _) = apply(&method, fold);
        assert!(!changed);
    }

    #[test]
    fn test_constant_branch_removed() {
        let method = method_from("p.A.f(int)int", 2, |asm| {
            let other = asm.new_label();
            asm.const_null(1)
                .if_zero(IfCond::Eq, 1, other)
                .return_value(0)
                .bind(other)
                .const_int(1, 3)
                .return_value(1);
        });
        let before = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();
        let (code, changed, events) = apply(&method, fold);
        assert!(changed);
        assert_eq!(code.block_count(), before.block_count() - 1);
        assert_eq!(events.count_kind(EventKind::BranchSimplified), 1);
    }

    #[test]
    fn test_constant_switch_removed() {
        let method = method_from("p.A.f()int", 1, |asm| {
            let (one, two) = (asm.new_label(), asm.new_label());
            asm.const_int(0, 2)
                .switch(0, &[(1, one), (2, two)])
                .return_value(0)
                .bind(one)
                .const_int(0, 10)
                .return_value(0)
                .bind(two)
                .const_int(0, 20)
                .return_value(0);
        });
        let (code, _, _) = apply(&method, fold);
        assert!(!consts(&code).contains(&ConstValue::Int(10)));
        assert!(consts(&code).contains(&ConstValue::Int(20)));
        assert!(!code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::Switch { .. })));
    }

    #[test]
    fn test_split_into_using_blocks() {
        let method = method_from("p.A.f(int)int", 2, |asm| {
            let other = asm.new_label();
            asm.const_int(1, 7)
                .if_zero(IfCond::Eq, 0, other)
                .return_value(1)
                .bind(other)
                .add_int(1, 1, 0)
                .return_value(1);
        });
        let (code, changed, _) = apply(&method, split);
        assert!(changed);
        let sevens = consts(&code)
            .into_iter()
            .filter(|c| *c == ConstValue::Int(7))
            .count();
        assert_eq!(sevens, 3);
    }
}
