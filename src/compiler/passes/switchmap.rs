//! Switch map removal.
//!
//! A `switch` over an enum compiles to a lookup in a synthetic table that maps ordinals to
//! dense case keys:
//!
//! ```text
//! v1 <- sget Outer$1.$SwitchMap$p$Color
//! v2 <- invoke-virtual p.Color.ordinal()int(v0)
//! v3 <- aget v1[v2]
//! switch v3 1:B1 2:B2 default:B3
//! ```
//!
//! When the program knows the contents of the table, the switch is rewritten to dispatch on
//! the ordinal directly, with every case key translated back to the ordinals mapping to it.
//! The table read becomes dead and is removed later.

use std::collections::HashSet;

use crate::{
    analysis::ir::{BlockId, DefSite, IrCode, IrOp},
    compiler::{EventKind, PassContext},
    program::InvokeKind,
    Result,
};

/// Rewrites switches over switch map lookups to switch on the enum ordinal.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    if !ctx.options.remove_switch_maps {
        return Ok(false);
    }

    let defs = code.definitions();
    let op_at = |site: Option<DefSite>| match site {
        Some(DefSite::Instruction(block, index)) => Some(&code.block(block).instructions[index]),
        _ => None,
    };

    let mut rewrites = Vec::new();
    for b in code.block_ids() {
        let Some(IrOp::Switch {
            value,
            keys,
            targets,
            fallthrough,
        }) = code.block(b).terminator()
        else {
            continue;
        };
        let Some(IrOp::ArrayGet { array, index, .. }) = op_at(defs[value.index()]) else {
            continue;
        };
        let Some(IrOp::StaticGet { field, .. }) = op_at(defs[array.index()]) else {
            continue;
        };
        let Some(IrOp::Invoke {
            kind: InvokeKind::Virtual,
            method,
            ..
        }) = op_at(defs[index.index()])
        else {
            continue;
        };
        if &*method.name != "ordinal" || method.proto.arity() != 0 {
            continue;
        }
        let Some(map) = ctx.program.switch_map(field) else {
            continue;
        };

        let mut new_keys = Vec::new();
        let mut new_targets = Vec::new();
        for (&ordinal, &key) in map {
            if let Some(position) = keys.iter().position(|&k| k == key) {
                new_keys.push(ordinal);
                new_targets.push(targets[position]);
            }
        }
        rewrites.push((
            b,
            IrOp::Switch {
                value: *index,
                keys: new_keys,
                targets: new_targets,
                fallthrough: *fallthrough,
            },
            field.clone(),
        ));
    }

    let changed = !rewrites.is_empty();
    for (block, switch, field) in rewrites {
        let before: HashSet<BlockId> = code.block(block).normal_successors().into_iter().collect();
        let after: HashSet<BlockId> = switch.successors().into_iter().collect();
        if let Some(terminator) = code.block_mut(block).terminator_mut() {
            *terminator = switch;
        }
        for dropped in before.difference(&after) {
            if !code
                .block(block)
                .catch_handlers
                .iter()
                .any(|h| h.target == *dropped)
            {
                code.remove_predecessor(*dropped, block);
            }
        }
        ctx.events
            .record(EventKind::SwitchMapRemoved)
            .at(ctx.method.id.clone(), block.index())
            .message(format!("switch on ordinal instead of {field}"))
            .pass("switch-maps");
    }
    if changed {
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
        program::{FieldId, MethodId, TypeName, ValueType},
        test::{method_from, program_with},
    };

    fn switch_map_field() -> FieldId {
        FieldId::new(
            TypeName::new("p.Outer$1"),
            "$SwitchMap$p$Color",
            TypeName::new("int[]"),
        )
    }

    fn method() -> crate::program::EncodedMethod {
        method_from("p.Outer.name(p.Color)int", 3, |asm| {
            let (red, green, other) = (asm.new_label(), asm.new_label(), asm.new_label());
            asm.static_get(1, switch_map_field())
                .invoke_virtual(MethodId::parse("p.Color.ordinal()int").unwrap(), &[0])
                .move_result(2)
                .array_get(1, 1, 2, ValueType::Int)
                .switch(1, &[(1, red), (2, green)]);
            asm.bind(other).const_int(1, -1).return_value(1);
            asm.bind(red).const_int(1, 10).return_value(1);
            asm.bind(green).const_int(1, 20).return_value(1);
        })
    }

    #[test]
    fn test_switch_on_ordinal() {
        let method = method();
        let mut program = program_with(vec![method.clone()]);
        // RED has ordinal 0 and case key 2, GREEN ordinal 3 and key 1.
        program.add_switch_map(switch_map_field(), [(0, 2), (3, 1)].into_iter().collect());

        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();
        assert!(run(&mut code, &mut ctx).unwrap());
        code.verify_ssa().unwrap();

        let switch = code
            .instructions()
            .find_map(|(_, op)| match op {
                IrOp::Switch { keys, value, .. } => Some((keys.clone(), *value)),
                _ => None,
            })
            .unwrap();
        assert_eq!(switch.0, vec![0, 3]);
        assert!(code.instructions().any(|(_, op)| matches!(
            op,
            IrOp::Invoke { dest: Some(d), .. } if *d == switch.1
        )));
        assert_eq!(events.count_kind(EventKind::SwitchMapRemoved), 1);
    }

    #[test]
    fn test_unknown_map_kept() {
        let method = method();
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();
        assert!(!run(&mut code, &mut ctx).unwrap());
    }
}
