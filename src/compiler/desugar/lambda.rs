//! Lambda desugaring.
//!
//! Every distinct lambda creation site descriptor gets a synthesized class named
//! `{Holder}$$Lambda${implName}` that implements the functional interface:
//!
//! ```text
//! final class p.A$$Lambda$lambda$run$0 implements java.lang.Runnable {
//!     private final int f$0;
//!     private <init>(int)              // stores the captured values
//!     public static create(int)Runnable // new-instance + <init>
//!     public final run()void            // loads f$*, calls p.A.lambda$run$0(int, ...)
//! }
//! ```
//!
//! Call sites become `invoke-static create(captures)`. Class names are fixed up front from a
//! scan of the program, so they do not depend on the order in which methods are optimized;
//! the classes that are actually used are registered concurrently while the pipeline runs.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;

use crate::{
    analysis::ir::{IrCode, IrOp},
    compiler::{EventKind, PassContext},
    program::{
        CallSiteDescriptor, ClassFlags, CodeAssembler, EncodedField, EncodedMethod, FieldFlags,
        FieldId, InvokeKind, MethodFlags, MethodId, Program, ProgramClass, Proto, RawInstruction,
        Reg, TypeName,
    },
    Result,
};

/// Name of the compiler generated lambda deserialization hook.
pub const DESERIALIZE_LAMBDA: &str = "$deserializeLambda$";

const FACTORY: &str = "create";

/// Types of the values a lambda captures: the leading implementation parameters the
/// interface method does not supply.
fn captured_types(call_site: &CallSiteDescriptor) -> Vec<TypeName> {
    let implementation = &call_site.implementation;
    let mut parameters: Vec<TypeName> = Vec::new();
    if call_site.implementation_kind.has_receiver() {
        parameters.push(implementation.holder.clone());
    }
    parameters.extend(implementation.proto.parameters.iter().cloned());
    let captured = parameters.len().saturating_sub(call_site.method_proto.arity());
    parameters.truncate(captured);
    parameters
}

/// Rewrites lambda creation sites and synthesizes the lambda classes.
#[derive(Debug, Default)]
pub struct LambdaRewriter {
    names: HashMap<Arc<CallSiteDescriptor>, TypeName>,
    used: DashMap<TypeName, Arc<CallSiteDescriptor>>,
}

impl LambdaRewriter {
    /// Assigns a class name to every lambda creation site of `program`, in program order.
    #[must_use]
    pub fn new(program: &Program) -> Self {
        let mut names: HashMap<Arc<CallSiteDescriptor>, TypeName> = HashMap::new();
        let mut taken: Vec<TypeName> = Vec::new();
        let sites = program
            .methods()
            .filter_map(|m| m.code.as_ref())
            .flat_map(|code| code.instructions.iter())
            .filter_map(|instruction| match instruction {
                RawInstruction::InvokeCustom { call_site, .. } => Some(call_site),
                _ => None,
            });
        for call_site in sites {
            if names.contains_key(call_site) {
                continue;
            }
            let implementation = &call_site.implementation;
            let base = format!("{}$$Lambda${}", implementation.holder, implementation.name);
            let mut name = TypeName::new(base.as_str());
            let mut suffix = 1;
            while taken.contains(&name) || program.is_program_type(&name) {
                name = TypeName::new(format!("{base}${suffix}"));
                suffix += 1;
            }
            taken.push(name.clone());
            names.insert(call_site.clone(), name);
        }
        Self {
            names,
            used: DashMap::new(),
        }
    }

    /// Returns the class synthesized for `call_site`.
    #[must_use]
    pub fn class_for(&self, call_site: &CallSiteDescriptor) -> Option<&TypeName> {
        self.names.get(call_site)
    }

    /// Returns the factory method of the lambda class `class`.
    #[must_use]
    pub fn factory(class: &TypeName, call_site: &CallSiteDescriptor) -> MethodId {
        MethodId::new(
            class.clone(),
            FACTORY,
            Proto::new(call_site.interface.clone(), captured_types(call_site)),
        )
    }

    /// Returns the number of lambda classes used so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Returns `true` if no creation site was rewritten.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    fn register(&self, class: &TypeName, call_site: &Arc<CallSiteDescriptor>) {
        self.used
            .entry(class.clone())
            .or_insert_with(|| call_site.clone());
    }

    /// Removes the lambda deserialization hooks; deserialization of desugared lambdas is not
    /// supported. Returns the number of removed methods.
    pub fn remove_deserialization_methods(program: &mut Program) -> usize {
        let mut removed = 0;
        for class in program.classes_mut() {
            let before = class.direct_methods.len();
            class
                .direct_methods
                .retain(|m| &*m.id.name != DESERIALIZE_LAMBDA);
            removed += before - class.direct_methods.len();
        }
        removed
    }

    /// Makes private implementation methods of used lambdas callable from their lambda class.
    pub fn adjust_accessibility(&self, program: &mut Program) {
        for entry in &self.used {
            if let Some(method) = program.method_mut(&entry.value().implementation) {
                if method.is_private() {
                    method.flags.remove(MethodFlags::PRIVATE);
                }
            }
        }
    }

    /// Builds the used lambda classes, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if a class body cannot be assembled.
    pub fn synthesize_classes(&self) -> Result<Vec<ProgramClass>> {
        let mut used: Vec<(TypeName, Arc<CallSiteDescriptor>)> = self
            .used
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        used.sort_by(|a, b| a.0.cmp(&b.0));
        used.into_iter()
            .map(|(class, call_site)| synthesize(&class, &call_site))
            .collect()
    }
}

fn synthesize(ty: &TypeName, call_site: &CallSiteDescriptor) -> Result<ProgramClass> {
    let captured = captured_types(call_site);
    let count = captured.len() as Reg;
    let fields: Vec<FieldId> = captured
        .iter()
        .enumerate()
        .map(|(index, field_type)| {
            FieldId::new(ty.clone(), format!("f${index}"), field_type.clone())
        })
        .collect();

    let mut class = ProgramClass::new(ty.clone(), ClassFlags::FINAL | ClassFlags::SYNTHETIC);
    class.interfaces.push(call_site.interface.clone());
    class.fields = fields
        .iter()
        .map(|id| {
            EncodedField::new(
                id.clone(),
                FieldFlags::PRIVATE | FieldFlags::FINAL | FieldFlags::SYNTHETIC,
            )
        })
        .collect();

    // <init>: this in r0, captures in r1..
    let constructor = MethodId::new(
        ty.clone(),
        "<init>",
        Proto::new(TypeName::void(), captured.clone()),
    );
    let mut asm = CodeAssembler::new(count + 1, count + 1);
    asm.invoke_direct(
        MethodId::new(TypeName::object(), "<init>", Proto::void()),
        &[0],
    );
    for (index, field) in fields.iter().enumerate() {
        asm.instance_put(index as Reg + 1, 0, field.clone());
    }
    asm.return_void();
    class.add_method(EncodedMethod::new(
        constructor.clone(),
        MethodFlags::PRIVATE | MethodFlags::CONSTRUCTOR | MethodFlags::SYNTHETIC,
        Some(asm.finish()?),
    ));

    // create: captures in r0.., instance in the last register
    let mut asm = CodeAssembler::new(count + 1, count);
    let mut args = vec![count];
    args.extend(0..count);
    asm.new_instance(count, ty.clone())
        .invoke_direct(constructor, &args)
        .return_value(count);
    class.add_method(EncodedMethod::new(
        LambdaRewriter::factory(ty, call_site),
        MethodFlags::PUBLIC | MethodFlags::STATIC | MethodFlags::SYNTHETIC,
        Some(asm.finish()?),
    ));

    // interface method: this in r0, parameters next, then loaded captures and the result
    let parameters = call_site.method_proto.arity() as Reg;
    let ins = parameters + 1;
    let result = ins + count;
    let mut asm = CodeAssembler::new(result + 1, ins);
    let mut args: Vec<Reg> = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        let register = ins + index as Reg;
        asm.instance_get(register, 0, field.clone());
        args.push(register);
    }
    args.extend(1..ins);
    asm.invoke(
        call_site.implementation_kind,
        call_site.implementation.clone(),
        &args,
    );
    if call_site.method_proto.return_type.is_void() {
        asm.return_void();
    } else if call_site.implementation.proto.return_type.is_void() {
        asm.const_value(result, call_site.method_proto.return_type.value_type().zero())
            .return_value(result);
    } else {
        asm.move_result(result).return_value(result);
    }
    class.add_method(EncodedMethod::new(
        MethodId::new(
            ty.clone(),
            call_site.method_name.clone(),
            call_site.method_proto.clone(),
        ),
        MethodFlags::PUBLIC | MethodFlags::FINAL | MethodFlags::SYNTHETIC,
        Some(asm.finish()?),
    ));

    Ok(class)
}

/// Replaces lambda creation sites by calls to the lambda class factories.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let Some(rewriter) = ctx.lambdas else {
        return Ok(false);
    };

    let mut changed = false;
    for block in code.block_ids().collect::<Vec<_>>() {
        for (index, op) in code.block_mut(block).instructions.iter_mut().enumerate() {
            let IrOp::InvokeCustom {
                call_site,
                args,
                dest,
            } = op
            else {
                continue;
            };
            let Some(class) = rewriter.class_for(call_site) else {
                continue;
            };
            rewriter.register(class, call_site);
            let factory = LambdaRewriter::factory(class, call_site);
            ctx.events
                .record(EventKind::LambdaDesugared)
                .at(ctx.method.id.clone(), index)
                .message(format!("{}", call_site.implementation))
                .pass("lambda-desugaring");
            *op = IrOp::Invoke {
                kind: InvokeKind::Static,
                method: factory,
                args: std::mem::take(args),
                dest: *dest,
            };
            changed = true;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        compiler::{CompilerOptions, EventLog},
        test::{method_from, program_with, Interpreter, Value},
    };

    fn call_site() -> CallSiteDescriptor {
        CallSiteDescriptor {
            interface: TypeName::new("java.util.function.IntSupplier"),
            method_name: "getAsInt".into(),
            method_proto: Proto::new(TypeName::int(), vec![]),
            implementation: MethodId::parse("p.A.lambda$get$0(int)int").unwrap(),
            implementation_kind: InvokeKind::Static,
        }
    }

    fn program() -> Program {
        let user = method_from("p.A.get(int)java.util.function.IntSupplier", 2, |asm| {
            asm.invoke_custom(call_site(), &[0]).move_result(1).return_value(1);
        });
        let implementation = method_from("p.A.lambda$get$0(int)int", 2, |asm| {
            asm.const_int(1, 1).add_int(1, 0, 1).return_value(1);
        });
        program_with(vec![user, implementation])
    }

    #[test]
    fn test_names_follow_implementation() {
        let program = program();
        let rewriter = LambdaRewriter::new(&program);
        assert_eq!(
            rewriter.class_for(&call_site()).unwrap().as_str(),
            "p.A$$Lambda$lambda$get$0"
        );
        assert!(rewriter.is_empty());
    }

    #[test]
    fn test_call_site_becomes_factory_call() {
        let program = program();
        let rewriter = LambdaRewriter::new(&program);
        let method = program.methods().next().unwrap().clone();
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx =
            PassContext::new(&program, &options, &method, &events).with_lambdas(&rewriter);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();

        assert!(run(&mut code, &mut ctx).unwrap());
        code.verify_ssa().unwrap();
        let factory = code
            .instructions()
            .find_map(|(_, op)| match op {
                IrOp::Invoke { method, kind, .. } => Some((*kind, method.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(factory.0, InvokeKind::Static);
        assert_eq!(
            factory.1.to_string(),
            "p.A$$Lambda$lambda$get$0.create(int)java.util.function.IntSupplier"
        );
        assert_eq!(rewriter.len(), 1);
        assert_eq!(events.count_kind(EventKind::LambdaDesugared), 1);
    }

    #[test]
    fn test_synthesized_class_forwards_captures() {
        let mut program = program();
        let rewriter = LambdaRewriter::new(&program);
        let class = rewriter.class_for(&call_site()).unwrap().clone();
        rewriter.register(&class, &Arc::new(call_site()));
        for synthesized in rewriter.synthesize_classes().unwrap() {
            program.add_class(synthesized).unwrap();
        }

        let definition = program.definition_for(&class).unwrap();
        assert_eq!(definition.fields.len(), 1);
        assert_eq!(
            definition.interfaces,
            vec![TypeName::new("java.util.function.IntSupplier")]
        );

        let mut interpreter = Interpreter::new(&program);
        let lambda = interpreter
            .run(
                &format!("{class}.create(int)java.util.function.IntSupplier"),
                &[Value::Int(41)],
            )
            .unwrap();
        let result = interpreter
            .run(&format!("{class}.getAsInt()int"), &[lambda])
            .unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_deserialization_hooks_removed() {
        let hook = method_from(
            "p.A.$deserializeLambda$(java.lang.Object)java.lang.Object",
            1,
            |asm| {
                asm.return_value(0);
            },
        );
        let mut program = program_with(vec![hook]);
        assert_eq!(LambdaRewriter::remove_deserialization_methods(&mut program), 1);
        assert_eq!(program.methods().count(), 0);
    }

    #[test]
    fn test_private_implementation_opened() {
        let mut program = program();
        let id = call_site().implementation;
        program.method_mut(&id).unwrap().flags = MethodFlags::PRIVATE | MethodFlags::STATIC;
        let rewriter = LambdaRewriter::new(&program);
        rewriter.register(
            rewriter.class_for(&call_site()).unwrap(),
            &Arc::new(call_site()),
        );
        rewriter.adjust_accessibility(&mut program);
        assert!(!program.method(&id).unwrap().is_private());
    }
}
