//! Inlining of simple methods.
//!
//! A call is replaced by the callee's body when the callee was already optimized (callees run
//! in earlier leaf batches), its [`InliningConstraint`] admits the caller, it is simple (one
//! block, few instructions, no handlers) and the caller's budget has room. Inlining is single
//! level: the inlined instructions are not scanned again in the same run.
//!
//! # Double inlining
//!
//! A call to a callee that is not processed yet, or that crosses an edge removed to break a
//! call graph cycle, cannot be decided now. The caller records the callee as a double-inline
//! target; after phase 1 the converter optimizes such callers once more with a permissive
//! [`Inliner`]. Calls to the recorded targets then get the larger `double_inline_budget`; all
//! other calls of the revisited caller keep the phase 1 rules.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, ValueId},
    compiler::{EventKind, InliningOptions, PassContext},
    program::{
        ClassFlags, ConstValue, EncodedMethod, FieldFlags, FieldId, InliningConstraint,
        InvokeKind, MethodFlags, MethodId, Program, TypeName,
    },
    Result,
};

/// Inlining policy shared by all methods of a run.
#[derive(Debug, Clone)]
pub struct Inliner {
    budget: usize,
    double_inline_budget: usize,
    simple_max: usize,
    permissive: bool,
    double_inline_targets: HashSet<MethodId>,
}

impl Inliner {
    /// Creates the phase 1 inliner.
    #[must_use]
    pub fn new(options: &InliningOptions) -> Self {
        Self {
            budget: options.inline_budget,
            double_inline_budget: options.inline_budget,
            simple_max: options.simple_method_max_size,
            permissive: false,
            double_inline_targets: HashSet::new(),
        }
    }

    /// Creates the inliner used to revisit double-inline callers. Only calls to `targets` are
    /// decided permissively; every other call follows the phase 1 rules.
    #[must_use]
    pub fn permissive(options: &InliningOptions, targets: HashSet<MethodId>) -> Self {
        Self {
            budget: options.inline_budget,
            double_inline_budget: options.double_inline_budget,
            simple_max: options.simple_method_max_size,
            permissive: true,
            double_inline_targets: targets,
        }
    }

    /// Instructions a caller may grow by.
    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Instructions a caller may grow by when inlining `target`: the double-inline budget for
    /// a double-inline target of the permissive revisit, the ordinary budget otherwise.
    #[must_use]
    pub fn budget_for(&self, target: &MethodId) -> usize {
        if self.widens(target) {
            self.double_inline_budget
        } else {
            self.budget
        }
    }

    /// Returns `true` if calls to `target` are decided permissively.
    #[must_use]
    pub fn widens(&self, target: &MethodId) -> bool {
        self.permissive && self.is_double_inline_target(target)
    }

    /// Maximum size of a simple method.
    #[must_use]
    pub fn simple_method_max_size(&self) -> usize {
        self.simple_max
    }

    /// Returns `true` for the double inlining revisit.
    #[must_use]
    pub fn is_permissive(&self) -> bool {
        self.permissive
    }

    /// Returns `true` if `method` was selected as a double-inline target.
    #[must_use]
    pub fn is_double_inline_target(&self, method: &MethodId) -> bool {
        self.double_inline_targets.contains(method)
    }
}

/// Double-inline callers and targets collected during phase 1, in batch order.
#[derive(Debug, Clone, Default)]
pub struct DoubleInlining {
    callers: Vec<MethodId>,
    seen: HashSet<MethodId>,
    targets: HashSet<MethodId>,
}

impl DoubleInlining {
    /// Registers `caller` as waiting for `targets`.
    pub fn record(&mut self, caller: &MethodId, targets: &[MethodId]) {
        if targets.is_empty() {
            return;
        }
        if self.seen.insert(caller.clone()) {
            self.callers.push(caller.clone());
        }
        self.targets.extend(targets.iter().cloned());
    }

    /// Returns `true` if no caller is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }

    /// Returns the callers in the order they were recorded.
    #[must_use]
    pub fn callers(&self) -> &[MethodId] {
        &self.callers
    }

    /// Returns the selected targets.
    #[must_use]
    pub fn targets(&self) -> &HashSet<MethodId> {
        &self.targets
    }
}

/// Returns `true` if `code` is small enough to be inlined: one block ending in a return, no
/// catch handlers, no call to itself and at most `max_size` instructions.
#[must_use]
pub fn identify_simple_method(code: &IrCode, method: &MethodId, max_size: usize) -> bool {
    if code.block_count() != 1 {
        return false;
    }
    let block = code.block(BlockId::ENTRY);
    if !block.catch_handlers.is_empty()
        || !matches!(block.terminator(), Some(IrOp::Return { .. }))
    {
        return false;
    }
    let recursive = block
        .instructions
        .iter()
        .any(|op| matches!(op, IrOp::Invoke { method: callee, .. } if callee == method));
    !recursive && code.instruction_count() <= max_size
}

fn type_constraint(program: &Program, ty: &TypeName) -> InliningConstraint {
    let base = ty.element_type().unwrap_or_else(|| ty.clone());
    match program.definition_for(&base) {
        Some(class) if !class.flags.contains(ClassFlags::PUBLIC) => {
            InliningConstraint::SamePackage
        }
        _ => InliningConstraint::Always,
    }
}

fn method_constraint(program: &Program, caller: &TypeName, target: &MethodId) -> InliningConstraint {
    let Some(definition) = program.lookup_method(target) else {
        return InliningConstraint::Always;
    };
    let member = if definition.is_private() {
        if &definition.id.holder == caller {
            InliningConstraint::SameClass
        } else {
            InliningConstraint::Never
        }
    } else if definition.is_public() {
        InliningConstraint::Always
    } else {
        InliningConstraint::SamePackage
    };
    member.meet(type_constraint(program, &definition.id.holder))
}

fn field_constraint(
    program: &Program,
    caller: &TypeName,
    field: &FieldId,
) -> InliningConstraint {
    let Some(definition) = program.field(field) else {
        return InliningConstraint::Always;
    };
    let member = if definition.flags.contains(FieldFlags::PRIVATE) {
        if &field.holder == caller {
            InliningConstraint::SameClass
        } else {
            InliningConstraint::Never
        }
    } else if definition.flags.contains(FieldFlags::PUBLIC) {
        InliningConstraint::Always
    } else {
        InliningConstraint::SamePackage
    };
    member.meet(type_constraint(program, &field.holder))
}

/// Computes where the optimized `code` of `method` may be inlined.
///
/// Methods that are not simple, initializers, synchronized methods and methods using
/// `invoke-super` are never inlined. Otherwise the result is the most restrictive constraint of
/// the members and types the body references.
#[must_use]
pub fn compute_constraint(
    code: &IrCode,
    method: &EncodedMethod,
    program: &Program,
    max_size: usize,
) -> InliningConstraint {
    if !identify_simple_method(code, &method.id, max_size)
        || method.id.is_initializer()
        || method
            .flags
            .intersects(MethodFlags::CONSTRUCTOR | MethodFlags::SYNCHRONIZED)
    {
        return InliningConstraint::Never;
    }
    let holder = &method.id.holder;
    let mut constraint = InliningConstraint::Always;
    for (_, op) in code.instructions() {
        let touched = match op {
            IrOp::Invoke {
                kind: InvokeKind::Super,
                ..
            } => InliningConstraint::Never,
            IrOp::Invoke { method: target, .. } => method_constraint(program, holder, target),
            IrOp::InvokeCustom { .. } => InliningConstraint::SameClass,
            IrOp::InstanceGet { field, .. }
            | IrOp::InstancePut { field, .. }
            | IrOp::StaticGet { field, .. }
            | IrOp::StaticPut { field, .. } => field_constraint(program, holder, field),
            IrOp::NewInstance { ty, .. }
            | IrOp::NewArray { ty, .. }
            | IrOp::FilledNewArray { ty, .. }
            | IrOp::CheckCast { ty, .. }
            | IrOp::InstanceOf { ty, .. }
            | IrOp::Const {
                value: ConstValue::Type(ty),
                ..
            } => type_constraint(program, ty),
            _ => InliningConstraint::Always,
        };
        constraint = constraint.meet(touched);
        if constraint == InliningConstraint::Never {
            break;
        }
    }
    constraint
}

/// The straight-line body of a simple callee: its instructions without arguments, debug
/// markers and gotos, and the returned value.
struct LinearBody {
    instructions: Vec<IrOp>,
    returned: Option<ValueId>,
}

fn linear_body(code: &IrCode) -> Option<LinearBody> {
    let mut instructions = Vec::new();
    let mut block = BlockId::ENTRY;
    let mut visited = 0;
    'blocks: loop {
        visited += 1;
        if visited > code.block_count() {
            return None;
        }
        let current = code.block(block);
        if !current.phis.is_empty() || !current.catch_handlers.is_empty() {
            return None;
        }
        for op in &current.instructions {
            match op {
                IrOp::Goto { target } => {
                    block = *target;
                    continue 'blocks;
                }
                IrOp::Return { value } => {
                    return Some(LinearBody {
                        instructions,
                        returned: *value,
                    })
                }
                IrOp::Position { .. } => {}
                IrOp::MoveException { .. } => return None,
                other if other.is_terminator() => return None,
                other => instructions.push(other.clone()),
            }
        }
        return None;
    }
}

/// Returns the instruction defining `value`.
fn defining_op(code: &IrCode, value: ValueId) -> Option<&IrOp> {
    code.instructions()
        .map(|(_, op)| op)
        .find(|op| op.dest() == Some(value))
}

fn needs_null_check(code: &IrCode, caller: &EncodedMethod, receiver: ValueId) -> bool {
    match defining_op(code, receiver) {
        Some(IrOp::Argument { index: 0, .. }) => caller.is_static(),
        Some(IrOp::NewInstance { .. }) => false,
        _ => true,
    }
}

/// Maps the callee body into the caller's value space.
fn remap(
    code: &mut IrCode,
    callee_code: &IrCode,
    body: LinearBody,
    args: &[ValueId],
) -> Option<(Vec<IrOp>, Option<ValueId>)> {
    let mut map: HashMap<ValueId, ValueId> = HashMap::new();
    for (_, op) in callee_code.instructions() {
        if let IrOp::Argument { dest, index } = op {
            map.insert(*dest, *args.get(usize::from(*index))?);
        }
    }
    let mut result = Vec::with_capacity(body.instructions.len());
    for mut op in body.instructions {
        if matches!(op, IrOp::Argument { .. }) {
            continue;
        }
        let mut unmapped = false;
        op.for_each_use_mut(|v| match map.get(v) {
            Some(&mapped) => *v = mapped,
            None => unmapped = true,
        });
        if unmapped {
            return None;
        }
        if let Some(dest) = op.dest_mut() {
            let fresh = code.new_value(callee_code.value_type(*dest));
            map.insert(*dest, fresh);
            *dest = fresh;
        }
        result.push(op);
    }
    let returned = match body.returned {
        Some(value) => Some(*map.get(&value)?),
        None => None,
    };
    Some((result, returned))
}

/// Inlines eligible calls and records double-inline targets.
///
/// # Errors
///
/// Propagates IR builder errors for callee code.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    let Some(inliner) = ctx.inliner else {
        return Ok(false);
    };
    let caller = ctx.method;
    let mut used = 0usize;
    let mut changed = false;

    for b in 0..code.block_count() {
        let block = BlockId::new(b);
        if !code.block(block).catch_handlers.is_empty() {
            continue;
        }
        let mut index = 0;
        while index < code.block(block).instructions.len() {
            let IrOp::Invoke {
                kind,
                method,
                args,
                dest,
            } = &code.block(block).instructions[index]
            else {
                index += 1;
                continue;
            };
            let (kind, args, dest) = (*kind, args.clone(), *dest);
            let Some(target) = ctx.program.single_target(kind, method) else {
                index += 1;
                continue;
            };
            let Some(callee) = ctx.program.method(&target) else {
                index += 1;
                continue;
            };
            if target == caller.id || callee.code.is_none() {
                index += 1;
                continue;
            }

            let broken = ctx
                .call_graph
                .is_some_and(|graph| graph.is_breaker(&caller.id, &target));
            if !inliner.widens(&target) && (!callee.is_processed() || broken) {
                if !inliner.is_permissive()
                    && !ctx.summary.double_inline_targets.contains(&target)
                {
                    ctx.summary.double_inline_targets.push(target.clone());
                    ctx.events
                        .record(EventKind::DoubleInlineRequested)
                        .at(caller.id.clone(), index)
                        .message(format!("waiting for {target}"))
                        .pass("inlining");
                }
                index += 1;
                continue;
            }

            let allowed = callee
                .constraint()
                .is_some_and(|c| c.allows(&callee.id.holder, &caller.id.holder));
            if !allowed || !callee.info.is_simple {
                index += 1;
                continue;
            }
            let Some(callee_code) = ctx.builder.build_ir(callee)? else {
                index += 1;
                continue;
            };
            let Some(body) = linear_body(&callee_code) else {
                index += 1;
                continue;
            };
            let size = body.instructions.len();
            if used + size > inliner.budget_for(&target) {
                index += 1;
                continue;
            }
            let Some((mut inlined, returned)) = remap(code, &callee_code, body, &args) else {
                index += 1;
                continue;
            };
            if kind.has_receiver() && !callee.is_static() {
                if let Some(&receiver) = args.first() {
                    if needs_null_check(code, caller, receiver) {
                        inlined.insert(0, IrOp::NullCheck { value: receiver });
                    }
                }
            }

            let inserted = inlined.len();
            code.block_mut(block)
                .instructions
                .splice(index..=index, inlined);
            if let (Some(dest), Some(returned)) = (dest, returned) {
                code.replace_uses(dest, returned);
            }
            ctx.events
                .record(EventKind::MethodInlined)
                .at(caller.id.clone(), index)
                .message(format!("{target}"))
                .pass("inlining");
            ctx.summary.inlined.push(target);
            used += size;
            changed = true;
            index += inserted;
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
        program::{CodeAssembler, EncodedField, ProcessedState, ProgramClass},
        test::{method_from, program_with},
    };

    fn processed(mut method: EncodedMethod, constraint: InliningConstraint) -> EncodedMethod {
        method.mark_processed(constraint);
        method.info.is_simple = true;
        method
    }

    fn inline_into(
        program: &Program,
        caller: &EncodedMethod,
        inliner: &Inliner,
    ) -> (IrCode, PassResult) {
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx =
            PassContext::new(program, &options, caller, &events).with_inliner(inliner, None);
        let mut code = RegisterIrBuilder.build_ir(caller).unwrap().unwrap();
        let changed = run(&mut code, &mut ctx).unwrap();
        code.verify_ssa().unwrap();
        (
            code,
            PassResult {
                changed,
                inlined: ctx.summary.inlined,
                waiting: ctx.summary.double_inline_targets,
            },
        )
    }

    struct PassResult {
        changed: bool,
        inlined: Vec<MethodId>,
        waiting: Vec<MethodId>,
    }

    fn seven() -> EncodedMethod {
        method_from("p.A.seven()int", 1, |asm| {
            asm.const_int(0, 7).return_value(0);
        })
    }

    fn caller() -> EncodedMethod {
        method_from("p.B.f(int)int", 2, |asm| {
            asm.invoke_static(MethodId::parse("p.A.seven()int").unwrap(), &[])
                .move_result(1)
                .add_int(0, 0, 1)
                .return_value(0);
        })
    }

    #[test]
    fn test_simple_callee_inlined() {
        let program = program_with(vec![
            processed(seven(), InliningConstraint::Always),
            caller(),
        ]);
        let inliner = Inliner::new(&InliningOptions::default());
        let (code, result) = inline_into(&program, &caller(), &inliner);
        assert!(result.changed);
        assert_eq!(result.inlined, vec![MethodId::parse("p.A.seven()int").unwrap()]);
        assert!(!code
            .instructions()
            .any(|(_, op)| matches!(op, IrOp::Invoke { .. })));
        assert!(code.instructions().any(|(_, op)| matches!(
            op,
            IrOp::Const {
                value: ConstValue::Int(7),
                ..
            }
        )));
    }

    #[test]
    fn test_unprocessed_callee_requests_double_inline() {
        let program = program_with(vec![seven(), caller()]);
        let inliner = Inliner::new(&InliningOptions::default());
        let (_, result) = inline_into(&program, &caller(), &inliner);
        assert!(!result.changed);
        assert_eq!(result.waiting, vec![MethodId::parse("p.A.seven()int").unwrap()]);
    }

    #[test]
    fn test_permissive_inliner_does_not_request_again() {
        let program = program_with(vec![seven(), caller()]);
        let inliner = Inliner::permissive(&InliningOptions::default(), HashSet::new());
        let (_, result) = inline_into(&program, &caller(), &inliner);
        assert!(!result.changed);
        assert!(result.waiting.is_empty());
    }

    fn eight() -> EncodedMethod {
        method_from("p.A.eight()int", 1, |asm| {
            asm.const_int(0, 8).return_value(0);
        })
    }

    // seven() + eight() + a
    fn two_calls() -> EncodedMethod {
        method_from("p.B.g(int)int", 3, |asm| {
            asm.invoke_static(MethodId::parse("p.A.seven()int").unwrap(), &[])
                .move_result(1)
                .invoke_static(MethodId::parse("p.A.eight()int").unwrap(), &[])
                .move_result(2)
                .add_int(1, 1, 2)
                .add_int(0, 0, 1)
                .return_value(0);
        })
    }

    fn targets(signatures: &[&str]) -> HashSet<MethodId> {
        signatures
            .iter()
            .map(|s| MethodId::parse(s).unwrap())
            .collect()
    }

    #[test]
    fn test_permissive_revisit_only_widens_targets() {
        // eight() is still unprocessed; only seven() waited for the revisit
        let program = program_with(vec![
            processed(seven(), InliningConstraint::Always),
            eight(),
            two_calls(),
        ]);
        let inliner =
            Inliner::permissive(&InliningOptions::default(), targets(&["p.A.seven()int"]));
        let (code, result) = inline_into(&program, &two_calls(), &inliner);
        assert!(result.changed);
        assert_eq!(result.inlined, vec![MethodId::parse("p.A.seven()int").unwrap()]);
        assert!(result.waiting.is_empty());
        let calls: Vec<String> = code
            .instructions()
            .filter_map(|(_, op)| match op {
                IrOp::Invoke { method, .. } => Some(method.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec!["p.A.eight()int".to_string()]);
    }

    #[test]
    fn test_permissive_budget_limited_to_targets() {
        let program = program_with(vec![
            processed(seven(), InliningConstraint::Always),
            processed(eight(), InliningConstraint::Always),
            two_calls(),
        ]);
        let options = InliningOptions {
            inline_budget: 0,
            double_inline_budget: 200,
            ..InliningOptions::default()
        };
        let inliner = Inliner::permissive(&options, targets(&["p.A.seven()int"]));
        assert_eq!(inliner.budget_for(&MethodId::parse("p.A.seven()int").unwrap()), 200);
        assert_eq!(inliner.budget_for(&MethodId::parse("p.A.eight()int").unwrap()), 0);

        let (_, result) = inline_into(&program, &two_calls(), &inliner);
        assert_eq!(result.inlined, vec![MethodId::parse("p.A.seven()int").unwrap()]);
    }

    #[test]
    fn test_constraint_blocks_other_class() {
        let program = program_with(vec![
            processed(seven(), InliningConstraint::SameClass),
            caller(),
        ]);
        let inliner = Inliner::new(&InliningOptions::default());
        let (_, result) = inline_into(&program, &caller(), &inliner);
        assert!(!result.changed);
        assert!(result.waiting.is_empty());
    }

    #[test]
    fn test_budget_respected() {
        let program = program_with(vec![
            processed(seven(), InliningConstraint::Always),
            caller(),
        ]);
        let inliner = Inliner::new(&InliningOptions {
            inline_budget: 0,
            ..InliningOptions::default()
        });
        let (_, result) = inline_into(&program, &caller(), &inliner);
        assert!(!result.changed);
    }

    #[test]
    fn test_instance_callee_gets_null_check() {
        let getter_id = MethodId::parse("p.A.get()int").unwrap();
        let field = FieldId::new(TypeName::new("p.A"), "x", TypeName::int());
        let mut asm = CodeAssembler::new(2, 1);
        asm.instance_get(1, 0, field.clone()).return_value(1);
        let getter = EncodedMethod::new(
            getter_id.clone(),
            MethodFlags::PUBLIC,
            Some(asm.finish().unwrap()),
        );
        let user = method_from("p.B.use(p.A)int", 2, |asm| {
            asm.invoke_virtual(getter_id.clone(), &[0])
                .move_result(1)
                .return_value(1);
        });
        let mut program = program_with(vec![
            processed(getter, InliningConstraint::Always),
            user.clone(),
        ]);
        program
            .definition_for_mut(&TypeName::new("p.A"))
            .unwrap()
            .fields
            .push(EncodedField::new(field, FieldFlags::PUBLIC));

        let inliner = Inliner::new(&InliningOptions::default());
        let (code, result) = inline_into(&program, &user, &inliner);
        assert!(result.changed);
        let ops: Vec<&IrOp> = code.instructions().map(|(_, op)| op).collect();
        let check = ops
            .iter()
            .position(|op| matches!(op, IrOp::NullCheck { .. }))
            .unwrap();
        let read = ops
            .iter()
            .position(|op| matches!(op, IrOp::InstanceGet { .. }))
            .unwrap();
        assert!(check < read);
    }

    #[test]
    fn test_inlined_body_replaces_call() {
        let program = program_with(vec![
            processed(seven(), InliningConstraint::Always),
            caller(),
        ]);
        let inliner = Inliner::new(&InliningOptions::default());
        let (code, _) = inline_into(&program, &caller(), &inliner);
        // const 7, add, return
        assert_eq!(code.instruction_count(), 3);
    }

    #[test]
    fn test_simple_method_classifier() {
        let method = seven();
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();
        let program = program_with(vec![method.clone()]);
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        crate::compiler::passes::deadcode::run(&mut code, &mut ctx).unwrap();
        assert!(identify_simple_method(&code, &method.id, 5));
        assert!(!identify_simple_method(&code, &method.id, 1));
        assert_eq!(
            compute_constraint(&code, &method, &program, 5),
            InliningConstraint::Always
        );
    }

    #[test]
    fn test_private_field_limits_to_same_class() {
        let field = FieldId::new(TypeName::new("p.A"), "secret", TypeName::int());
        let method = method_from("p.A.peek()int", 1, |asm| {
            asm.static_get(0, field.clone()).return_value(0);
        });
        let mut class = ProgramClass::new(TypeName::new("p.A"), ClassFlags::PUBLIC);
        class.add_method(method.clone());
        class.fields.push(EncodedField::new(
            field,
            FieldFlags::PRIVATE | FieldFlags::STATIC,
        ));
        let mut program = Program::new();
        program.add_class(class).unwrap();

        let options = CompilerOptions::default();
        let events = EventLog::new();
        let mut ctx = PassContext::new(&program, &options, &method, &events);
        let mut code = RegisterIrBuilder.build_ir(&method).unwrap().unwrap();
        crate::compiler::passes::deadcode::run(&mut code, &mut ctx).unwrap();
        assert_eq!(
            compute_constraint(&code, &method, &program, 5),
            InliningConstraint::SameClass
        );
        assert_eq!(method.state(), ProcessedState::NotProcessed);
    }

    #[test]
    fn test_double_inlining_records_callers_once() {
        let mut pending = DoubleInlining::default();
        let a = MethodId::parse("p.A.a()void").unwrap();
        let b = MethodId::parse("p.A.b()void").unwrap();
        pending.record(&a, &[b.clone()]);
        pending.record(&a, &[b.clone()]);
        pending.record(&b, &[]);
        assert_eq!(pending.callers(), &[a]);
        assert!(pending.targets().contains(&b));
    }
}
