//! Lens rewriting.
//!
//! Applies the pending member renames and moves of the current [`crate::analysis::GraphLens`]
//! to invokes, field accesses and type references, so that the rest of the pipeline sees
//! the program as it is after the previous transformation round.

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp},
    compiler::{EventKind, PassContext},
    program::ConstValue,
    Result,
};

/// Rewrites every member and type reference through the lens.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let lens = ctx.lens;
    if lens.is_identity() {
        return Ok(false);
    }

    let mut changed = false;
    for b in 0..code.block_count() {
        let block = code.block_mut(BlockId::new(b));
        for (index, op) in block.instructions.iter_mut().enumerate() {
            match op {
                IrOp::Invoke { method, .. } => {
                    let target = lens.lookup_method(method);
                    if target != *method {
                        ctx.events
                            .record(EventKind::CallRetargeted)
                            .at(ctx.method.id.clone(), index)
                            .message(format!("{method} -> {target}"))
                            .pass("lens");
                        *method = target;
                        changed = true;
                    }
                }
                IrOp::InstanceGet { field, .. }
                | IrOp::InstancePut { field, .. }
                | IrOp::StaticGet { field, .. }
                | IrOp::StaticPut { field, .. } => {
                    let target = lens.lookup_field(field);
                    if target != *field {
                        *field = target;
                        changed = true;
                    }
                }
                IrOp::NewInstance { ty, .. }
                | IrOp::NewArray { ty, .. }
                | IrOp::FilledNewArray { ty, .. }
                | IrOp::CheckCast { ty, .. }
                | IrOp::InstanceOf { ty, .. }
                | IrOp::Const {
                    value: ConstValue::Type(ty),
                    ..
                } => {
                    let target = lens.lookup_type(ty);
                    if target != *ty {
                        *ty = target;
                        changed = true;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(changed)
}
