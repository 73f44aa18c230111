//! Shared helpers for the unit tests.
//!
//! - [`program_with`] and [`static_method`] build small programs without spelling out classes;
//! - [`Interpreter`] executes raw code, so tests can check that a transformation keeps the
//!   observable behaviour of a method (its result and the library calls it makes).


pub use interpreter::{Interpreter, Value};

use crate::program::{
    ClassFlags, CodeAssembler, EncodedMethod, MethodFlags, MethodId, Program, ProgramClass,
};

/// Builds a program holding `methods`, one class per distinct holder in order of appearance.
pub fn program_with(methods: Vec<EncodedMethod>) -> Program {
    let mut classes: Vec<ProgramClass> = Vec::new();
    for method in methods {
        let holder = method.id.holder.clone();
        match classes.iter_mut().find(|c| c.ty == holder) {
            Some(class) => class.add_method(method),
            None => {
                let mut class = ProgramClass::new(holder, ClassFlags::PUBLIC);
                class.add_method(method);
                classes.push(class);
            }
        }
    }
    let mut program = Program::new();
    for class in classes {
        program.add_class(class).unwrap();
    }
    program
}

/// Builds a public static method `signature` that calls each of `callees` (static, no
/// arguments) in order and returns. Non-void methods return `0` or `null`.
pub fn static_method(signature: &str, callees: &[&str]) -> EncodedMethod {
    let id = MethodId::parse(signature).unwrap();
    let ins = id.proto.arity() as u16;
    let mut asm = CodeAssembler::new(ins + 1, ins);
    for callee in callees {
        asm.invoke_static(MethodId::parse(callee).unwrap(), &[]);
    }
    if id.proto.return_type.is_void() {
        asm.return_void();
    } else if id.proto.return_type.is_primitive() {
        asm.const_value(ins, id.proto.return_type.value_type().zero())
            .return_value(ins);
    } else {
        asm.const_null(ins).return_value(ins);
    }
    EncodedMethod::new(
        id,
        MethodFlags::PUBLIC | MethodFlags::STATIC,
        Some(asm.finish().unwrap()),
    )
}

/// Builds a public static method from an assembler filled by `body`.
pub fn method_from(
    signature: &str,
    registers: u16,
    body: impl FnOnce(&mut CodeAssembler),
) -> EncodedMethod {
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
