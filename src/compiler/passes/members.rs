//! Member value propagation.
//!
//! A read of a `static final` program field that carries a compile-time constant is replaced
//! by the constant itself. The field read disappears, and with it the need for the class
//! initializer check; the constant then feeds folding and branch simplification.
//!
//! ```text
//! v1 <- sget p.Config.DEBUG        v1 <- const 0
//! if-eqz v1 then B2 else B1   =>   if-eqz v1 then B2 else B1
//! ```

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp},
    compiler::{EventKind, PassContext},
    Result,
};

/// Replaces reads of constant static fields by their value.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    if !ctx.propagate_member_values {
        return Ok(false);
    }

    let mut changed = false;
    for b in 0..code.block_count() {
        let block = BlockId::new(b);
        for index in 0..code.block(block).instructions.len() {
            let IrOp::StaticGet { dest, field } = &code.block(block).instructions[index] else {
                continue;
            };
            let dest = *dest;
            let Some(value) = ctx
                .program
                .field(field)
                .filter(|f| f.is_constant())
                .and_then(|f| f.static_value.clone())
            else {
                continue;
            };
            if value.value_type() != code.value_type(dest) {
                continue;
            }

            ctx.events
                .record(EventKind::FieldValuePropagated)
                .at(ctx.method.id.clone(), index)
                .message(format!("{field} = {value}"))
                .pass("member-values");
            code.block_mut(block).instructions[index] = IrOp::Const { dest, value };
            changed = true;
        }
    }
    Ok(changed)
}
