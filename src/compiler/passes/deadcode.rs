//! Dead code elimination.
//!
//! Each round resolves trivial phis, removes every instruction and phi whose value is never
//! needed, and merges straight-line block pairs. Rounds repeat until nothing changes or the
//! configured bound is reached.
//!
//! # Liveness
//!
//! Liveness is mark and sweep over values. The roots are the instructions that must stay
//! regardless of their result: side effects, terminators, arguments, casts and calls. A
//! value is live when a root or a live definition reads it. Calls whose result is dead keep
//! the call and lose the result.
//!
//! # Block merging
//!
//! A block `P` ending in `goto S` absorbs `S` when `P` is the only predecessor of `S`, `P`
//! has no catch handlers, and moving `P`'s instructions under `S`'s handlers does not give
//! them a new exceptional edge.

use std::collections::HashMap;

use crate::{
    analysis::ir::{BlockId, DefSite, IrCode, IrOp, ValueId},
    compiler::{EventKind, PassContext},
    Result,
};

fn is_root(op: &IrOp) -> bool {
    op.has_side_effects()
        || matches!(
            op,
            IrOp::Argument { .. }
                | IrOp::CheckCast { .. }
                | IrOp::Invoke { .. }
                | IrOp::InvokeCustom { .. }
        )
}

/// Returns the single value a phi merges, ignoring references to itself.
fn trivial_value(dest: ValueId, operands: &[ValueId]) -> Option<ValueId> {
    let mut unique = None;
    for &operand in operands {
        if operand == dest || Some(operand) == unique {
            continue;
        }
        if unique.is_some() {
            return None;
        }
        unique = Some(operand);
    }
    unique
}

/// Replaces phis whose operands are all the same value (or the phi itself) by that value.
fn resolve_trivial_phis(code: &mut IrCode) -> usize {
    let mut resolved = 0;
    loop {
        let found = code.block_ids().find_map(|b| {
            code.block(b).phis.iter().enumerate().find_map(|(index, phi)| {
                trivial_value(phi.dest, &phi.operands).map(|value| (b, index, phi.dest, value))
            })
        });
        let Some((block, index, dest, value)) = found else {
            return resolved;
        };
        code.block_mut(block).phis.remove(index);
        code.replace_uses(dest, value);
        resolved += 1;
    }
}

fn mark(value: ValueId, live: &mut [bool], worklist: &mut Vec<ValueId>) {
    if !live[value.index()] {
        live[value.index()] = true;
        worklist.push(value);
    }
}

fn mark_live(code: &IrCode) -> Vec<bool> {
    let defs = code.definitions();
    let mut live = vec![false; code.value_count()];
    let mut worklist: Vec<ValueId> = Vec::new();

    for (_, op) in code.instructions() {
        if is_root(op) {
            op.for_each_use(|v| mark(v, &mut live, &mut worklist));
        }
    }
    while let Some(value) = worklist.pop() {
        match defs[value.index()] {
            Some(DefSite::Phi(block)) => {
                if let Some(phi) = code.block(block).phis.iter().find(|p| p.dest == value) {
                    for &operand in &phi.operands {
                        mark(operand, &mut live, &mut worklist);
                    }
                }
            }
            Some(DefSite::Instruction(block, index)) => {
                code.block(block).instructions[index]
                    .for_each_use(|v| mark(v, &mut live, &mut worklist));
            }
            None => {}
        }
    }
    live
}

fn sweep(code: &mut IrCode, ctx: &PassContext<'_>) -> usize {
    let live = mark_live(code);
    let is_live = |v: ValueId| live[v.index()];
    let mut removed = 0;
    for b in 0..code.block_count() {
        let block = code.block_mut(BlockId::new(b));
        let phis_before = block.phis.len();
        block.phis.retain(|phi| is_live(phi.dest));
        removed += phis_before - block.phis.len();

        let mut kept = Vec::with_capacity(block.instructions.len());
        for (index, mut op) in std::mem::take(&mut block.instructions).into_iter().enumerate() {
            if is_root(&op) {
                if let IrOp::Invoke { dest, .. } | IrOp::InvokeCustom { dest, .. } = &mut op {
                    if dest.is_some_and(|d| !is_live(d)) {
                        *dest = None;
                        removed += 1;
                    }
                }
                kept.push(op);
            } else if op.dest().is_some_and(is_live) {
                kept.push(op);
            } else {
                ctx.events
                    .record(EventKind::InstructionRemoved)
                    .at(ctx.method.id.clone(), index)
                    .message(format!("{op}"))
                    .pass("dead-code");
                removed += 1;
            }
        }
        block.instructions = kept;
    }
    removed
}

/// Returns the block `pred` can absorb, if any.
fn mergeable_successor(code: &IrCode, pred: BlockId) -> Option<BlockId> {
    let block = code.block(pred);
    let Some(IrOp::Goto { target }) = block.terminator() else {
        return None;
    };
    let succ = *target;
    if succ == pred || succ == BlockId::ENTRY || !block.catch_handlers.is_empty() {
        return None;
    }
    let next = code.block(succ);
    if next.predecessors != [pred]
        || matches!(next.instructions.first(), Some(IrOp::MoveException { .. }))
    {
        return None;
    }
    if !next.catch_handlers.is_empty() && block.instructions.iter().any(IrOp::can_throw) {
        return None;
    }
    Some(succ)
}

fn merge_blocks(code: &mut IrCode, ctx: &PassContext<'_>) -> usize {
    let mut merged = 0;
    let mut b = 0;
    while b < code.block_count() {
        let pred = BlockId::new(b);
        let Some(succ) = mergeable_successor(code, pred) else {
            b += 1;
            continue;
        };

        let absorbed = std::mem::take(code.block_mut(succ));
        let forwarded: HashMap<ValueId, ValueId> = absorbed
            .phis
            .iter()
            .filter_map(|phi| phi.operands.first().map(|&operand| (phi.dest, operand)))
            .collect();
        for target in absorbed.successors() {
            for p in &mut code.block_mut(target).predecessors {
                if *p == succ {
                    *p = pred;
                }
            }
        }
        let block = code.block_mut(pred);
        block.instructions.pop();
        block.instructions.extend(absorbed.instructions);
        block.catch_handlers = absorbed.catch_handlers;
        code.replace_uses_with(&forwarded);

        ctx.events
            .record(EventKind::BlockRemoved)
            .at(ctx.method.id.clone(), succ.index())
            .message(format!("{succ} merged into {pred}"))
            .pass("dead-code");
        merged += 1;
    }
    if merged > 0 {
        code.remove_unreachable_blocks();
    }
    merged
}

/// Removes dead values and merges straight-line blocks until a fixed point.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let mut changed = false;
    for _ in 0..ctx.options.max_dce_iterations.max(1) {
        let mut round = resolve_trivial_phis(code);
        round += sweep(code, ctx);
        round += merge_blocks(code, ctx);
        if round == 0 {
            break;
        }
        changed = true;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        compiler::{CompilerOptions, EventLog},
        program::{EncodedMethod, IfCond, MethodId},
        test::{method_from, program_with},
    };

    fn optimize(method: &EncodedMethod) -> (IrCode, bool, EventLog) {
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut code = RegisterIrBuilder.build_ir(method).unwrap().unwrap();
        let changed = {
            let mut ctx = PassContext::new(&program, &options, method, &events);
            let changed = run(&mut code, &mut ctx).unwrap();
            code.verify_ssa().unwrap();
            assert!(!run(&mut code, &mut ctx).unwrap(), "not at a fixed point");
            changed
        };
        (code, changed, events)
    }

    #[test]
    fn test_unused_arithmetic_removed() {
        let method = method_from("p.A.f(int,int)int", 3, |asm| {
            asm.add_int(2, 0, 1).mul_int(2, 2, 2).return_value(0);
        });
        let (code, changed, events) = optimize(&method);
        assert!(changed);
        assert!(!code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::Binary { .. })));
        assert_eq!(events.count_kind(EventKind::InstructionRemoved), 2);
    }

    #[test]
    fn test_unused_call_result_dropped() {
        let method = method_from("p.A.f()void", 1, |asm| {
            asm.invoke_static(MethodId::parse("q.B.next()int").unwrap(), &[])
                .move_result(0)
                .return_void();
        });
        let (code, _, _) = optimize(&method);
        assert!(code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::Invoke { dest: None, .. })));
    }

    #[test]
    fn test_straight_line_blocks_merged() {
        let method = method_from("p.A.f(int)int", 2, |asm| {
            let (first, second) = (asm.new_label(), asm.new_label());
            asm.goto(first)
                .bind(second)
                .return_value(1)
                .bind(first)
                .add_int(1, 0, 0)
                .goto(second);
        });
        let (code, _, events) = optimize(&method);
        assert_eq!(code.block_count(), 1);
        assert!(events.count_kind(EventKind::BlockRemoved) >= 2);
    }

    #[test]
    fn test_loop_kept() {
        // int f(int n) { int i = n; while (i != 0) i = i + n; return i; }
        let method = method_from("p.A.f(int)int", 2, |asm| {
            let (head, exit) = (asm.new_label(), asm.new_label());
            asm.move_reg(1, 0)
                .bind(head)
                .if_zero(IfCond::Eq, 1, exit)
                .add_int(1, 1, 0)
                .goto(head)
                .bind(exit)
                .return_value(1);
        });
        let (code, _, _) = optimize(&method);
        assert!(code.blocks().iter().any(|b| !b.phis.is_empty()));
        assert!(code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::Binary { .. })));
    }

    #[test]
    fn test_dead_loop_phi_removed() {
        // the loop counter is never read after the loop
        let method = method_from("p.A.f(int)void", 2, |asm| {
            let (head, exit) = (asm.new_label(), asm.new_label());
            asm.const_int(1, 0)
                .bind(head)
                .if_zero(IfCond::Eq, 0, exit)
                .add_int(1, 1, 0)
                .goto(head)
                .bind(exit)
                .return_void();
        });
        let (code, changed, _) = optimize(&method);
        assert!(changed);
        assert!(code.blocks().iter().all(|b| b.phis.is_empty()));
    }
}
