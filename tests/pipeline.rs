//! Optimization pipeline integration tests.
//!
//! These tests run the pipeline over a small corpus of methods built with `CodeAssembler`:
//! 1. Lift each method with `RegisterIrBuilder`
//! 2. Run `Pipeline::standard` pass by pass, verifying SSA after every pass
//! 3. Check dead code removal is idempotent
//! 4. Compile whole programs with `Converter` and compare parallel and sequential output

use dexopt::{
    compiler::{passes::deadcode, EventLog, PassContext, PassKind, Pipeline},
    prelude::*,
    program::ValueType,
};

fn method(signature: &str, registers: u16, body: impl FnOnce(&mut CodeAssembler)) -> EncodedMethod {
    let id = MethodId::parse(signature).unwrap();
    let ins = id.proto.arity() as u16;
    let mut asm = CodeAssembler::new(registers.max(ins), ins);
    body(&mut asm);
    EncodedMethod::new(
        id,
        MethodFlags::PUBLIC | MethodFlags::STATIC,
        Some(asm.finish().unwrap()),
    )
}

fn program(methods: &[EncodedMethod]) -> Program {
    let mut class = ProgramClass::new(TypeName::new("p.A"), ClassFlags::PUBLIC);
    for method in methods {
        class.add_method(method.clone());
    }
    let mut program = Program::new();
    program.add_class(class).unwrap();
    program
}

fn helper() -> MethodId {
    MethodId::parse("p.A.twice(int)int").unwrap()
}

/// Methods exercising branches, loops, switches, calls, arrays and exception handlers.
fn corpus() -> Vec<EncodedMethod> {
    let mut methods = Vec::new();

    methods.push(method("p.A.twice(int)int", 2, |asm| {
        asm.add_int(1, 0, 0).return_value(1);
    }));

    // max(a, b) with a folded constant on one path
    methods.push(method("p.A.max(int,int)int", 4, |asm| {
        let other = asm.new_label();
        asm.if_cmp(IfCond::Lt, 0, 1, other)
            .return_value(0)
            .bind(other)
            .const_int(2, 3)
            .const_int(3, 4)
            .add_int(2, 2, 3)
            .add_int(2, 2, 1)
            .return_value(2);
    }));

    // sum of 0..n with a redundant recomputation
    methods.push(method("p.A.sum(int)int", 5, |asm| {
        let head = asm.new_label();
        let exit = asm.new_label();
        asm.const_int(1, 0)
            .const_int(2, 0)
            .const_int(3, 1)
            .bind(head)
            .if_cmp(IfCond::Ge, 2, 0, exit)
            .add_int(1, 1, 2)
            .add_int(4, 2, 3)
            .add_int(2, 2, 3)
            .goto(head)
            .bind(exit)
            .return_value(1);
    }));

    // switch over a call result
    methods.push(method("p.A.pick(int)int", 3, |asm| {
        let one = asm.new_label();
        let two = asm.new_label();
        asm.invoke_static(helper(), &[0])
            .move_result(1)
            .switch(1, &[(2, one), (4, two)])
            .const_int(2, 0)
            .return_value(2)
            .bind(one)
            .const_int(2, 10)
            .return_value(2)
            .bind(two)
            .const_int(2, 20)
            .return_value(2);
    }));

    // constant array filled element by element
    methods.push(method("p.A.array()int[]", 3, |asm| {
        asm.const_int(0, 2)
            .new_array(1, 0, TypeName::new("int[]"))
            .const_int(0, 0)
            .const_int(2, 7)
            .array_put(2, 1, 0, ValueType::Int)
            .const_int(0, 1)
            .array_put(2, 1, 0, ValueType::Int)
            .return_value(1);
    }));

    // a call guarded by a catch-all handler
    methods.push(method("p.A.guarded(int)int", 3, |asm| {
        let start = asm.new_label();
        let end = asm.new_label();
        let handler = asm.new_label();
        asm.bind(start)
            .invoke_static(helper(), &[0])
            .move_result(1)
            .bind(end)
            .return_value(1)
            .bind(handler)
            .move_exception(2)
            .const_int(1, -1)
            .return_value(1)
            .try_range(start, end, &[(None, handler)]);
    }));

    methods
}

#[test]
fn test_ssa_consistent_after_every_pass() -> Result<()> {
    let methods = corpus();
    let program = program(&methods);
    let options = CompilerOptions::default();
    let events = EventLog::new();
    let pipeline = Pipeline::standard();

    for method in &methods {
        let mut code = RegisterIrBuilder.build_ir(method)?.unwrap();
        code.verify_ssa()?;
        let mut ctx = PassContext::new(&program, &options, method, &events);
        let mut checked = Vec::new();
        pipeline.run_with(&mut code, &mut ctx, |pass, code, _| {
            checked.push((pass, code.verify_ssa().map_err(|e| e.to_string())));
        })?;
        assert!(!checked.is_empty());
        for (pass, result) in checked {
            assert!(result.is_ok(), "{}: after {pass}: {result:?}", method.id);
        }
    }
    Ok(())
}

#[test]
fn test_dead_code_removal_idempotent() -> Result<()> {
    let methods = corpus();
    let program = program(&methods);
    let options = CompilerOptions::default();
    let events = EventLog::new();

    for method in &methods {
        let mut code = RegisterIrBuilder.build_ir(method)?.unwrap();
        let mut ctx = PassContext::new(&program, &options, method, &events);
        Pipeline::standard().run(&mut code, &mut ctx)?;

        deadcode::run(&mut code, &mut ctx)?;
        let once = code.to_string();
        let changed = deadcode::run(&mut code, &mut ctx)?;
        assert!(!changed, "{}", method.id);
        assert_eq!(once, code.to_string());
    }
    Ok(())
}

#[test]
fn test_conversion_pipeline_is_a_subset() {
    let standard = Pipeline::standard();
    for pass in Pipeline::conversion().passes() {
        assert!(standard.passes().contains(pass), "{pass}");
    }
    assert!(!Pipeline::conversion().passes().contains(&PassKind::Inlining));
    assert_eq!(standard.passes().first(), Some(&PassKind::LensRewrite));
    assert_eq!(standard.passes().last(), Some(&PassKind::ArgumentLogging));
}

#[test]
fn test_whole_program_parallel_matches_sequential() -> Result<()> {
    let render = |program: &Program| -> Vec<String> {
        program
            .methods()
            .map(|m| format!("{}\n{}", m.id, m.code.as_ref().unwrap()))
            .collect()
    };

    let mut parallel = program(&corpus());
    let options = CompilerOptions::default().with_threads(4, true);
    let first = Converter::new(options)?.optimize(&mut parallel)?;

    let mut sequential = program(&corpus());
    let options = CompilerOptions::default().with_threads(1, false);
    let second = Converter::new(options)?.optimize(&mut sequential)?;

    assert_eq!(first, second);
    assert_eq!(render(&parallel), render(&sequential));
    Ok(())
}

#[test]
fn test_optimized_code_is_well_formed() -> Result<()> {
    let mut program = program(&corpus());
    let converter = Converter::new(CompilerOptions::default())?;
    converter.optimize(&mut program)?;

    for method in program.methods() {
        let code = method.code.as_ref().unwrap();
        assert!(code.registers >= code.ins, "{}", method.id);
        // the optimized code lifts again
        let lifted = RegisterIrBuilder.build_ir(method)?.unwrap();
        lifted.verify_ssa()?;
    }
    assert!(converter.events().has(EventKind::CodeRegenerated));
    Ok(())
}

#[test]
fn test_conversion_error_reported_before_work() {
    let mut options = CompilerOptions::default();
    options.attributes.keep_inner_classes = true;
    let error = Converter::new(options).unwrap_err();
    assert!(matches!(error, Error::Configuration(_)));
    assert!(error.to_string().contains("InnerClasses"));
}
