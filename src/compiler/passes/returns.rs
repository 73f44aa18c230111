//! Returns-argument analysis.
//!
//! Finds methods where every `return` returns the same incoming argument, such as fluent
//! setters returning `this`. The index lands in the method summary; callers optimized later
//! use it to forward the argument instead of the call result.

use crate::{
    analysis::ir::{DefSite, IrCode, IrOp, ValueId},
    compiler::{EventKind, PassContext},
    Result,
};

/// Records the argument every return returns, if there is one. Never changes the code.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let defs = code.definitions();
    let argument_index = |value: ValueId| match defs[value.index()] {
        Some(DefSite::Instruction(block, index)) => match code.block(block).instructions[index] {
            IrOp::Argument { index, .. } => Some(usize::from(index)),
            _ => None,
        },
        _ => None,
    };

    let mut returned = None;
    let mut consistent = true;
    for (_, op) in code.instructions() {
        let IrOp::Return { value } = op else {
            continue;
        };
        match value.and_then(argument_index) {
            Some(index) if returned.is_none() || returned == Some(index) => {
                returned = Some(index);
            }
            _ => {
                consistent = false;
                break;
            }
        }
    }

    ctx.summary.returns_argument = returned.filter(|_| consistent);
    if let Some(index) = ctx.summary.returns_argument {
        ctx.events
            .record(EventKind::ReturnsArgumentIdentified)
            .method(ctx.method.id.clone())
            .message(format!("returns argument {index}"))
            .pass("returns-argument");
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        compiler::{CompilerOptions, EventLog},
        program::{EncodedMethod, IfCond},
        test::{method_from, program_with},
    };

    fn analyze(method: &EncodedMethod) -> Option<usize> {
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, method, &events);
        let mut code = RegisterIrBuilder.build_ir(method).unwrap().unwrap();
        assert!(!run(&mut code, &mut ctx).unwrap());
        ctx.summary.returns_argument
    }

    #[test]
    fn test_same_argument_on_all_paths() {
        let method = method_from("p.A.f(int,java.lang.String)java.lang.String", 2, |asm| {
            let other = asm.new_label();
            asm.if_zero(IfCond::Eq, 0, other)
                .return_value(1)
                .bind(other)
                .return_value(1);
        });
        assert_eq!(analyze(&method), Some(1));
    }

    #[test]
    fn test_different_values_returned() {
        let method = method_from("p.A.f(int,int)int", 2, |asm| {
            let other = asm.new_label();
            asm.if_zero(IfCond::Eq, 0, other)
                .return_value(1)
                .bind(other)
                .return_value(0);
        });
        assert_eq!(analyze(&method), None);
    }

    #[test]
    fn test_void_method() {
        let method = method_from("p.A.f(int)void", 1, |asm| {
            asm.return_void();
        });
        assert_eq!(analyze(&method), None);
    }
}
