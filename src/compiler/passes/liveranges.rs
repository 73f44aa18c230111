//! Live range shortening.
//!
//! A constant whose every use sits in a single block is moved right before its first use in
//! that block. Constants are cheap to materialize, and defining them late keeps their
//! registers free across the code in between.

use std::collections::HashMap;

use crate::{
    analysis::ir::{BlockId, DefSite, IrCode, IrOp, ValueId},
    compiler::{passes::insertion_point, EventKind, PassContext},
    program::ConstValue,
    Result,
};

#[derive(Clone, Copy)]
enum Uses {
    /// All uses are instructions of one block, the first at the given index
    Block(BlockId, usize),
    /// Used by a phi or in several blocks
    Spread,
}

fn collect_uses(code: &IrCode) -> HashMap<ValueId, Uses> {
    let mut uses: HashMap<ValueId, Uses> = HashMap::new();
    for b in code.block_ids() {
        let block = code.block(b);
        for phi in &block.phis {
            for &operand in &phi.operands {
                uses.insert(operand, Uses::Spread);
            }
        }
        for (index, op) in block.instructions.iter().enumerate() {
            op.for_each_use(|v| {
                let entry = uses.entry(v).or_insert(Uses::Block(b, index));
                if let Uses::Block(block, _) = *entry {
                    if block != b {
                        *entry = Uses::Spread;
                    }
                }
            });
        }
    }
    uses
}

/// Moves single-block constants next to their first use.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let mut changed = false;
    let defs = code.definitions();
    let uses = collect_uses(code);

    let mut moves: Vec<(ValueId, DefSite, BlockId)> = Vec::new();
    for (value, site) in defs.iter().enumerate() {
        let value = ValueId::new(value);
        let Some(site @ DefSite::Instruction(def_block, def_index)) = *site else {
            continue;
        };
        let IrOp::Const { value: constant, .. } = &code.block(def_block).instructions[def_index]
        else {
            continue;
        };
        if matches!(constant, ConstValue::Type(_)) {
            continue;
        }
        let Some(Uses::Block(use_block, first_use)) = uses.get(&value).copied() else {
            continue;
        };
        // already adjacent
        if use_block == def_block && first_use == def_index + 1 {
            continue;
        }
        if use_block == def_block && first_use < def_index {
            continue;
        }
        moves.push((value, site, use_block));
    }

    for (value, site, target) in moves {
        let DefSite::Instruction(block, _) = site else {
            continue;
        };
        let Some(from) = code
            .block(block)
            .instructions
            .iter()
            .position(|op| op.dest() == Some(value))
        else {
            continue;
        };
        let op = code.block_mut(block).instructions.remove(from);
        let first_use = code
            .block(target)
            .instructions
            .iter()
            .position(|op| op.uses().contains(&value))
            .unwrap_or(0);
        let at = first_use.max(insertion_point(code, target));
        code.block_mut(target).instructions.insert(at, op);

        ctx.events
            .record(EventKind::LiveRangeShortened)
            .at(ctx.method.id.clone(), at)
            .message(format!("{value} moved to {target}"))
            .pass("live-ranges");
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
        program::IfCond,
        test::{method_from, program_with},
    };

    #[test]
    fn test_constant_moved_into_using_block() {
        let method = method_from("p.A.f(int)int", 3, |asm| {
            let other = asm.new_label();
            asm.const_int(1, 100)
                .const_int(2, 5)
                .if_zero(IfCond::Eq, 0, other)
                .return_value(0)
                .bind(other)
                .add_int(0, 0, 2)
                .add_int(0, 0, 1)
                .return_value(0);
        });
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();

        assert!(run(&mut code, &mut ctx).unwrap());
        code.verify_ssa().unwrap();
        let (block, _) = code
            .instructions()
            .find(|(_, op)| {
                matches!(
                    op,
                    IrOp::Const {
                        value: ConstValue::Int(100),
                        ..
                    }
                )
            })
            .unwrap();
        assert!(code
            .block(block)
            .instructions
            .iter()
            .any(|op| matches!(op, IrOp::Binary { .. })));
        assert_eq!(events.count_kind(EventKind::LiveRangeShortened), 2);
        assert!(!run(&mut code, &mut ctx).unwrap());
    }
}
