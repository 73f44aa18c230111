//! Argument logging.
//!
//! Methods selected by [`crate::CompilerOptions::log_arguments_filter`] print their arguments
//! on entry:
//!
//! ```text
//! v5 <- sget java.lang.System.out
//! v6 <- const "Arguments:"
//! invoke-virtual java.io.PrintStream.println(java.lang.String)void(v5, v6)
//! invoke-virtual java.io.PrintStream.println(int)void(v5, v0)
//! ...
//! ```

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp},
    compiler::{EventKind, PassContext},
    program::{ConstValue, FieldId, InvokeKind, MethodId, Proto, TypeName, ValueType},
    Result,
};

fn print_stream() -> TypeName {
    TypeName::new("java.io.PrintStream")
}

fn println(parameter: TypeName) -> MethodId {
    MethodId::new(print_stream(), "println", Proto::new(TypeName::void(), vec![parameter]))
}

/// Inserts argument printing at the start of selected methods.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    if !ctx.options.method_matches_log_arguments_filter(&ctx.method.id) {
        return Ok(false);
    }

    let arguments: Vec<_> = code
        .block(BlockId::ENTRY)
        .instructions
        .iter()
        .filter_map(|op| match op {
            IrOp::Argument { dest, .. } => Some(*dest),
            _ => None,
        })
        .collect();

    let out = code.new_value(ValueType::Reference);
    let header = code.new_value(ValueType::Reference);
    let mut logging = vec![
        IrOp::StaticGet {
            dest: out,
            field: FieldId::new(TypeName::new("java.lang.System"), "out", print_stream()),
        },
        IrOp::Const {
            dest: header,
            value: ConstValue::string("Arguments:"),
        },
        IrOp::Invoke {
            kind: InvokeKind::Virtual,
            method: println(TypeName::string()),
            args: vec![out, header],
            dest: None,
        },
    ];
    for argument in arguments {
        let parameter = match code.value_type(argument) {
            ValueType::Int => TypeName::int(),
            ValueType::Long => TypeName::long(),
            ValueType::Float => TypeName::new("float"),
            ValueType::Double => TypeName::new("double"),
            ValueType::Reference => TypeName::object(),
        };
        logging.push(IrOp::Invoke {
            kind: InvokeKind::Virtual,
            method: println(parameter),
            args: vec![out, argument],
            dest: None,
        });
    }

    let entry = code.block_mut(BlockId::ENTRY);
    let at = entry.instructions.len().saturating_sub(1);
    entry.instructions.splice(at..at, logging);

    ctx.events
        .record(EventKind::ArgumentsLogged)
        .method(ctx.method.id.clone())
        .pass("argument-logging");
    Ok(true)
}
