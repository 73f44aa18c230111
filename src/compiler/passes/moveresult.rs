//! Move result folding.
//!
//! When a callee is known to always return one of its arguments (a builder's `append`, or a
//! program method whose last optimization found it so), the result of the call is the
//! argument itself. Uses of the result are redirected to the argument and the call keeps only
//! its side effects.

use std::collections::HashMap;

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, ValueId},
    compiler::{EventKind, PassContext},
    Result,
};

/// Forwards the results of calls to argument-returning methods.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let mut forwarded: HashMap<ValueId, ValueId> = HashMap::new();
    for b in 0..code.block_count() {
        let block = BlockId::new(b);
        for index in 0..code.block(block).instructions.len() {
            let IrOp::Invoke {
                kind,
                method,
                args,
                dest: Some(dest),
            } = &code.block(block).instructions[index]
            else {
                continue;
            };
            let target = match ctx.program.single_target(*kind, method) {
                Some(target) => target,
                // overridden in the program, any of the overrides may run
                None if ctx.program.lookup_method(method).is_some() => continue,
                None => method.clone(),
            };
            let Some(&argument) = ctx.returns_argument(&target).and_then(|i| args.get(i)) else {
                continue;
            };
            if code.value_type(argument) != code.value_type(*dest) {
                continue;
            }

            forwarded.insert(*dest, argument);
            ctx.events
                .record(EventKind::InstructionRemoved)
                .at(ctx.method.id.clone(), index)
                .message(format!("move-result of {target}"))
                .pass("move-result");
            if let IrOp::Invoke { dest, .. } = &mut code.block_mut(block).instructions[index] {
                *dest = None;
            }
        }
    }
    code.replace_uses_with(&forwarded);
    Ok(!forwarded.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        compiler::{CompilerOptions, EventLog},
        program::MethodId,
        test::{method_from, program_with},
    };

    fn append() -> MethodId {
        MethodId::parse("java.lang.StringBuilder.append(java.lang.String)java.lang.StringBuilder")
            .unwrap()
    }

    fn method() -> crate::program::EncodedMethod {
        method_from(
            "p.A.greet(java.lang.StringBuilder)java.lang.StringBuilder",
            2,
            |asm| {
                asm.const_string(1, "hi")
                    .invoke_virtual(append(), &[0, 1])
                    .move_result(1)
                    .return_value(1);
            },
        )
    }

    #[test]
    fn test_library_result_forwarded() {
        let method = method();
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let table: HashMap<MethodId, usize> = [(append(), 0)].into_iter().collect();
        let mut ctx =
            PassContext::new(&program, &options, &method, &events).with_library_returns(&table);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();

        assert!(run(&mut code, &mut ctx).unwrap());
        code.verify_ssa().unwrap();
        assert!(code.instructions().any(|(_, op)| matches!(
            op,
            IrOp::Return { value: Some(v) } if *v == ValueId::new(0)
        )));
        assert!(code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::Invoke { dest: None, .. })));
    }

    #[test]
    fn test_unknown_callee_kept() {
        let method = method();
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();
        assert!(!run(&mut code, &mut ctx).unwrap());
    }
}
