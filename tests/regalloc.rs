//! Register allocation through the public API: assignment, verification and the register
//! limit as seen by a whole-program compile.

use dexopt::{
    analysis::ir::IrOp,
    compiler::{passes::deadcode, LinearScanAllocator, PassContext, Pipeline},
    prelude::*,
};

fn method(signature: &str, registers: u16, body: impl FnOnce(&mut CodeAssembler)) -> EncodedMethod {
    let id = MethodId::parse(signature).unwrap();
    let ins = id.proto.arity() as u16;
    let mut asm = CodeAssembler::new(registers, ins);
    body(&mut asm);
    EncodedMethod::new(
        id,
        MethodFlags::PUBLIC | MethodFlags::STATIC,
        Some(asm.finish().unwrap()),
    )
}

fn program(methods: Vec<EncodedMethod>) -> Program {
    let mut class = ProgramClass::new(TypeName::new("p.A"), ClassFlags::PUBLIC);
    for method in methods {
        class.add_method(method);
    }
    let mut program = Program::new();
    program.add_class(class).unwrap();
    program
}

/// (a + b) + a * b, which needs a third register while both arguments are live.
fn products() -> EncodedMethod {
    method("p.A.products(int,int)int", 4, |asm| {
        asm.add_int(2, 0, 1)
            .mul_int(3, 0, 1)
            .add_int(0, 2, 3)
            .return_value(0);
    })
}

/// Polynomial evaluation in a loop: several values live across the back edge.
fn horner() -> EncodedMethod {
    method("p.A.horner(int,int)int", 6, |asm| {
        let head = asm.new_label();
        let exit = asm.new_label();
        asm.const_int(2, 0)
            .const_int(3, 0)
            .const_int(4, 1)
            .bind(head)
            .if_cmp(IfCond::Ge, 3, 1, exit)
            .mul_int(2, 2, 0)
            .add_int(2, 2, 3)
            .add_int(3, 3, 4)
            .goto(head)
            .bind(exit)
            .return_value(2);
    })
}

#[test]
fn test_optimized_values_get_conflict_free_registers() -> Result<()> {
    let methods = vec![products(), horner()];
    let program = program(methods.clone());
    let options = CompilerOptions::default();
    let events = EventLog::new();

    for method in &methods {
        let ins = method.id.proto.arity() as u16;
        let mut code = RegisterIrBuilder.build_ir(method)?.unwrap();
        let mut ctx = PassContext::new(&program, &options, method, &events);
        Pipeline::standard().run(&mut code, &mut ctx)?;
        deadcode::run(&mut code, &mut ctx)?;

        let allocation = LinearScanAllocator::new(&options, &events).assign(&mut code, ins)?;
        allocation.verify()?;
        assert!(allocation.registers() >= ins);

        for (_, op) in code.instructions() {
            if let IrOp::Argument { dest, index } = op {
                let first = allocation.pieces(*dest).next().unwrap();
                assert_eq!(first.register, Some(*index), "{}", method.id);
            }
        }
    }
    Ok(())
}

#[test]
fn test_allocated_code_respects_register_limit() -> Result<()> {
    let options = CompilerOptions {
        max_registers: 16,
        ..CompilerOptions::default()
    };
    let mut program = program(vec![products(), horner()]);
    Converter::new(options)?.optimize(&mut program)?;

    for method in program.methods() {
        let code = method.code.as_ref().unwrap();
        assert!(code.registers <= 16, "{}", method.id);
        assert_eq!(code.ins, method.id.proto.arity() as u16);
    }
    Ok(())
}

#[test]
fn test_register_pressure_aborts_compilation() {
    let options = CompilerOptions {
        max_registers: 2,
        ..CompilerOptions::default()
    };
    let mut program = program(vec![products()]);
    let error = Converter::new(options)
        .and_then(|converter| converter.optimize(&mut program))
        .unwrap_err();
    match error {
        Error::RegisterPressure { method, limit } => {
            assert_eq!(limit, 2);
            assert_eq!(method.to_string(), "p.A.products(int,int)int");
        }
        other => panic!("unexpected error: {other}"),
    }
}
