//! Long compare and null check normalization.
//!
//! - `Long.compare(a, b)` becomes the `cmp-long` instruction it is defined as;
//! - `Objects.requireNonNull(x)` becomes a plain null check on `x` when the minimum API level
//!   predates the method, and uses of its result are replaced by `x`.

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp},
    compiler::{EventKind, PassContext},
    program::{BinaryOp, InvokeKind, MethodId, NumericType, Proto, TypeName},
    Result,
};

fn long_compare() -> MethodId {
    MethodId::new(
        TypeName::new("java.lang.Long"),
        "compare",
        Proto::new(TypeName::int(), vec![TypeName::long(), TypeName::long()]),
    )
}

fn require_non_null() -> MethodId {
    MethodId::new(
        TypeName::new("java.util.Objects"),
        "requireNonNull",
        Proto::new(TypeName::object(), vec![TypeName::object()]),
    )
}

/// Rewrites `Long.compare` and, below API 19, `Objects.requireNonNull`.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let rewrite_null_checks = !ctx.options.can_use_long_compare_and_objects_non_null();
    let (long_compare, require_non_null) = (long_compare(), require_non_null());
    let mut forwarded = Vec::new();
    let mut changed = false;

    for b in 0..code.block_count() {
        let block = code.block_mut(BlockId::new(b));
        for (index, op) in block.instructions.iter_mut().enumerate() {
            let IrOp::Invoke {
                kind: InvokeKind::Static,
                method,
                args,
                dest,
            } = op
            else {
                continue;
            };
            if *method == long_compare && args.len() == 2 {
                let Some(dest) = *dest else {
                    continue;
                };
                *op = IrOp::Binary {
                    op: BinaryOp::Cmp,
                    ty: NumericType::Long,
                    dest,
                    left: args[0],
                    right: args[1],
                };
            } else if rewrite_null_checks && *method == require_non_null && args.len() == 1 {
                let value = args[0];
                if let Some(dest) = dest {
                    forwarded.push((*dest, value));
                }
                *op = IrOp::NullCheck { value };
            } else {
                continue;
            }
            ctx.events
                .record(EventKind::CallRetargeted)
                .at(ctx.method.id.clone(), index)
                .message(format!("{op}"))
                .pass("normalize");
            changed = true;
        }
    }

    for (old, new) in forwarded {
        code.replace_uses(old, new);
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        compiler::{CompilerOptions, EventLog},
        test::{method_from, program_with},
    };

    #[test]
    fn test_long_compare_becomes_cmp() {
        let method = method_from("p.A.cmp(long,long)int", 3, |asm| {
            asm.invoke_static(long_compare(), &[0, 1])
                .move_result(2)
                .return_value(2);
        });
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();

        assert!(run(&mut code, &mut ctx).unwrap());
        code.verify_ssa().unwrap();
        assert!(code.instructions().any(|(_, op)| matches!(
            op,
            IrOp::Binary {
                op: BinaryOp::Cmp,
                ty: NumericType::Long,
                ..
            }
        )));
    }

    #[test]
    fn test_require_non_null_depends_on_api() {
        let method = method_from("p.A.id(java.lang.Object)java.lang.Object", 2, |asm| {
            asm.invoke_static(require_non_null(), &[0])
                .move_result(1)
                .return_value(1);
        });
        let program = program_with(vec![method.clone()]);
        let events = EventLog::new();

        let modern = CompilerOptions {
            min_api_level: 26,
            ..CompilerOptions::default()
        };
        let mut ctx = PassContext::new(&program, &modern, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();
        assert!(!run(&mut code, &mut ctx).unwrap());

        let legacy = CompilerOptions::default();
        let mut ctx = PassContext::new(&program, &legacy, &method, &events);
        assert!(run(&mut code, &mut ctx).unwrap());
        code.verify_ssa().unwrap();
        assert!(code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::NullCheck { .. })));
        let returns_argument = code.instructions().any(|(_, op)| match op {
            IrOp::Return { value: Some(v) } => *v == crate::analysis::ir::ValueId::new(0),
            _ => false,
        });
        assert!(returns_argument);
    }
}
