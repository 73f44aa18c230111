//! Interface method desugaring.
//!
//! Platforms before API 24 cannot execute static methods declared on interfaces. Their bodies
//! move to a companion class `{Interface}$-CC`, and every `invoke-static` of such a method is
//! retargeted to the companion:
//!
//! ```text
//! invoke-static p.Shape.unit()p.Shape   =>   invoke-static p.Shape$-CC.unit()p.Shape
//! ```
//!
//! Call sites are rewritten per method by [`run`]; the methods themselves move in
//! [`move_static_methods`] once the whole program has been processed.

use crate::{
    analysis::ir::{IrCode, IrOp},
    compiler::{EventKind, PassContext},
    program::{ClassFlags, InvokeKind, MethodFlags, MethodId, Program, ProgramClass, TypeName},
    Result,
};

const COMPANION_SUFFIX: &str = "$-CC";

/// Returns the companion class of `interface`.
#[must_use]
pub fn companion_type(interface: &TypeName) -> TypeName {
    interface.with_suffix(COMPANION_SUFFIX)
}

fn companion_target(program: &Program, method: &MethodId) -> Option<MethodId> {
    let class = program.definition_for(&method.holder)?;
    if !class.is_interface() || &*method.name == "<clinit>" {
        return None;
    }
    Some(method.with_holder(companion_type(&method.holder)))
}

/// Retargets static interface calls to the companion classes.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let mut changed = false;
    for block in code.block_ids().collect::<Vec<_>>() {
        for (index, op) in code.block_mut(block).instructions.iter_mut().enumerate() {
            let IrOp::Invoke {
                kind: InvokeKind::Static,
                method,
                ..
            } = op
            else {
                continue;
            };
            let Some(target) = companion_target(ctx.program, method) else {
                continue;
            };
            ctx.events
                .record(EventKind::InterfaceCallRetargeted)
                .at(ctx.method.id.clone(), index)
                .message(format!("{method} -> {}", target.holder))
                .pass("interface-desugaring");
            *method = target;
            changed = true;
        }
    }
    Ok(changed)
}

/// Moves the static methods of program interfaces to their companion classes, which are
/// appended to the program. Returns the companion types in program order.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a companion class name is already taken.
pub fn move_static_methods(program: &mut Program) -> Result<Vec<TypeName>> {
    let mut companions = Vec::new();
    for class in program.classes_mut() {
        if !class.is_interface() {
            continue;
        }
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut class.direct_methods)
            .into_iter()
            .partition(|m| m.is_static() && &*m.id.name != "<clinit>");
        class.direct_methods = kept;
        if moved.is_empty() {
            continue;
        }

        let ty = companion_type(&class.ty);
        let flags = ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SYNTHETIC;
        let mut companion = ProgramClass::new(ty.clone(), flags);
        for mut method in moved {
            method.id = method.id.with_holder(ty.clone());
            method.flags.remove(MethodFlags::PRIVATE);
            method.flags.insert(MethodFlags::PUBLIC);
            companion.add_method(method);
        }
        companions.push(companion);
    }

    let mut types = Vec::with_capacity(companions.len());
    for companion in companions {
        types.push(companion.ty.clone());
        program.add_class(companion)?;
    }
    Ok(types)
}
