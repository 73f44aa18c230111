//! Try-with-resources desugaring.
//!
//! The code javac generates for `try (...)` blocks calls `Throwable.addSuppressed`, which older
//! platforms (before API 19) do not have. The calls are routed to static helpers on a backport
//! class added to the program:
//!
//! ```text
//! invoke-virtual java.lang.Throwable.addSuppressed(java.lang.Throwable)void(v1, v2)
//!   =>
//! invoke-static dexopt.backport.TwrUtility.addSuppressed(java.lang.Throwable,java.lang.Throwable)void(v1, v2)
//! ```
//!
//! The backport drops suppressed exceptions: `addSuppressed` does nothing and `getSuppressed`
//! returns an empty array.

use crate::{
    analysis::ir::{IrCode, IrOp},
    compiler::{EventKind, PassContext},
    program::{
        ClassFlags, CodeAssembler, EncodedMethod, InvokeKind, MethodFlags, MethodId, ProgramClass,
        Proto, TypeName,
    },
    Result,
};

/// The synthesized backport class.
pub const BACKPORT_CLASS: &str = "dexopt.backport.TwrUtility";

const THROWABLE: &str = "java.lang.Throwable";
const THROWABLE_ARRAY: &str = "java.lang.Throwable[]";

fn backport_for(method: &MethodId) -> Option<MethodId> {
    if method.holder.as_str() != THROWABLE {
        return None;
    }
    let throwable = TypeName::new(THROWABLE);
    let proto = match (&*method.name, method.proto.arity()) {
        ("addSuppressed", 1) => Proto::new(TypeName::void(), vec![throwable.clone(), throwable]),
        ("getSuppressed", 0) => Proto::new(TypeName::new(THROWABLE_ARRAY), vec![throwable]),
        _ => return None,
    };
    Some(MethodId::new(TypeName::new(BACKPORT_CLASS), &*method.name, proto))
}

/// Rewrites suppressed-exception calls to the backport.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let mut changed = false;
    for block in code.block_ids().collect::<Vec<_>>() {
        for (index, op) in code.block_mut(block).instructions.iter_mut().enumerate() {
            let IrOp::Invoke { kind, method, .. } = op else {
                continue;
            };
            if !matches!(kind, InvokeKind::Virtual) {
                continue;
            }
            let Some(backport) = backport_for(method) else {
                continue;
            };
            ctx.events
                .record(EventKind::SuppressedCallRewritten)
                .at(ctx.method.id.clone(), index)
                .message(format!("{}", method.name))
                .pass("twr-desugaring");
            *kind = InvokeKind::Static;
            *method = backport;
            changed = true;
        }
    }
    ctx.summary.twr_backport_used |= changed;
    Ok(changed)
}

/// Builds the backport class.
///
/// # Errors
///
/// Returns an error if a helper body cannot be assembled.
pub fn backport_class() -> Result<ProgramClass> {
    let ty = TypeName::new(BACKPORT_CLASS);
    let throwable = TypeName::new(THROWABLE);
    let flags = MethodFlags::PUBLIC | MethodFlags::STATIC | MethodFlags::SYNTHETIC;
    let mut class = ProgramClass::new(
        ty.clone(),
        ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SYNTHETIC,
    );

    let mut asm = CodeAssembler::new(2, 2);
    asm.return_void();
    class.add_method(EncodedMethod::new(
        MethodId::new(
            ty.clone(),
            "addSuppressed",
            Proto::new(TypeName::void(), vec![throwable.clone(), throwable.clone()]),
        ),
        flags,
        Some(asm.finish()?),
    ));

    let mut asm = CodeAssembler::new(3, 1);
    asm.const_int(1, 0)
        .new_array(2, 1, TypeName::new(THROWABLE_ARRAY))
        .return_value(2);
    class.add_method(EncodedMethod::new(
        MethodId::new(
            ty,
            "getSuppressed",
            Proto::new(TypeName::new(THROWABLE_ARRAY), vec![throwable]),
        ),
        flags,
        Some(asm.finish()?),
    ));
    Ok(class)
}
