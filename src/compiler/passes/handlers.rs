//! Catch handler removal.
//!
//! A block that no longer contains a throwing instruction (its call was inlined, its division
//! folded) cannot reach its catch handlers. The exceptional edges are dropped, and handlers
//! left without predecessors are removed with the rest of the unreachable code.

use crate::{
    analysis::ir::{BlockId, IrCode},
    compiler::{EventKind, PassContext},
    Result,
};

/// Removes the exceptional edges of blocks that cannot throw.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let mut changed = false;
    for b in 0..code.block_count() {
        let block = BlockId::new(b);
        let current = code.block(block);
        if current.catch_handlers.is_empty() || current.throwing_index().is_some() {
            continue;
        }
        let normal = current.normal_successors();
        let handlers = std::mem::take(&mut code.block_mut(block).catch_handlers);
        for handler in &handlers {
            if !normal.contains(&handler.target) {
                code.remove_predecessor(handler.target, block);
            }
            ctx.events
                .record(EventKind::HandlerRemoved)
                .at(ctx.method.id.clone(), b)
                .message(format!("{block} cannot throw into {}", handler.target))
                .pass("catch-handlers");
        }
        changed = true;
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
        analysis::{ir::IrOp, IrBuilder, RegisterIrBuilder},
        compiler::{passes::constants, CompilerOptions, EventLog},
        program::{BinaryOp, NumericType, TypeName},
        test::{method_from, program_with},
    };

    #[test]
    fn test_handler_of_folded_division_removed() {
        let method = method_from("p.A.f()int", 2, |asm| {
            let (start, end, handler) = (asm.new_label(), asm.new_label(), asm.new_label());
            asm.const_int(0, 8)
                .const_int(1, 2)
                .bind(start)
                .binary(BinaryOp::Div, NumericType::Int, 0, 0, 1)
                .bind(end)
                .return_value(0)
                .bind(handler)
                .move_exception(1)
                .const_int(0, -1)
                .return_value(0)
                .try_range(
                    start,
                    end,
                    &[(Some(TypeName::new("java.lang.ArithmeticException")), handler)],
                );
        });
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();

        assert!(!run(&mut code, &mut ctx).unwrap());
        assert!(constants::fold(&mut code, &mut ctx).unwrap());
        let blocks = code.block_count();
        assert!(run(&mut code, &mut ctx).unwrap());
        code.verify_ssa().unwrap();
        assert!(code.block_count() < blocks);
        assert!(!code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::MoveException { .. })));
        assert_eq!(events.count_kind(EventKind::HandlerRemoved), 1);
    }
}
