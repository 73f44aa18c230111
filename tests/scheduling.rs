//! Call graph scheduling integration tests.
//!
//! These tests drive [`CallGraph::pick_leaves`] and [`Converter::optimize`] through the public
//! API and check the callee-before-caller order, cycle breaking and the processed-state
//! bookkeeping of the converter.

use std::collections::HashSet;

use dexopt::{
    analysis::{CallGraph, GraphLens},
    compiler::EventKind,
    prelude::*,
};

/// A public static `signature` that calls each of `callees` (static, no arguments) and returns.
fn caller(signature: &str, callees: &[&str]) -> EncodedMethod {
    let id = MethodId::parse(signature).unwrap();
    let mut asm = CodeAssembler::new(1, 0);
    for callee in callees {
        asm.invoke_static(MethodId::parse(callee).unwrap(), &[]);
    }
    asm.return_void();
    EncodedMethod::new(
        id,
        MethodFlags::PUBLIC | MethodFlags::STATIC,
        Some(asm.finish().unwrap()),
    )
}

fn program(methods: Vec<EncodedMethod>) -> Program {
    let mut program = Program::new();
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
    for class in classes {
        program.add_class(class).unwrap();
    }
    program
}

fn names(batch: &[MethodId]) -> Vec<&str> {
    batch.iter().map(|m| &*m.name).collect()
}

#[test]
fn test_chain_scheduled_one_batch_per_level() -> Result<()> {
    let program = program(vec![
        caller("p.A.top()void", &["p.A.mid()void"]),
        caller("p.A.mid()void", &["p.A.leaf()void"]),
        caller("p.A.leaf()void", &[]),
    ]);
    let mut graph = CallGraph::build(&program, &GraphLens::default());

    let mut batches = Vec::new();
    while !graph.is_empty() {
        let batch = graph.pick_leaves()?;
        assert!(!batch.broke_cycles());
        batches.push(batch.methods().to_vec());
    }
    let batches: Vec<Vec<&str>> = batches.iter().map(|b| names(b)).collect();
    assert_eq!(batches, vec![vec!["leaf"], vec!["mid"], vec!["top"]]);
    Ok(())
}

#[test]
fn test_mutual_recursion_breaks_one_edge() -> Result<()> {
    let program = program(vec![
        caller("p.A.ping()void", &["p.A.pong()void"]),
        caller("p.A.pong()void", &["p.A.ping()void"]),
        caller("p.A.main()void", &["p.A.ping()void"]),
    ]);
    let mut graph = CallGraph::build(&program, &GraphLens::default());

    let first = graph.pick_leaves()?;
    assert!(first.broke_cycles());
    assert_eq!(first.len(), 1);
    assert_eq!(names(first.methods()), ["ping"]);
    // with ping removed, pong and main have no callees left and peel off together
    let second = graph.pick_leaves()?;
    assert!(!second.broke_cycles());
    assert_eq!(names(second.methods()), ["pong", "main"]);
    assert!(graph.is_empty());
    Ok(())
}

#[test]
fn test_leaves_never_precede_their_callees() -> Result<()> {
    // a diamond, a cycle hanging off it and an unrelated pair
    let program = program(vec![
        caller("p.A.root()void", &["p.A.left()void", "p.A.right()void"]),
        caller("p.A.left()void", &["p.A.bottom()void"]),
        caller("p.A.right()void", &["p.A.bottom()void", "p.B.x()void"]),
        caller("p.A.bottom()void", &["lib.L.io()void"]),
        caller("p.B.x()void", &["p.B.y()void"]),
        caller("p.B.y()void", &["p.B.z()void"]),
        caller("p.B.z()void", &["p.B.x()void"]),
        caller("p.C.solo()void", &[]),
        caller("p.C.user()void", &["p.C.solo()void"]),
    ]);
    let mut graph = CallGraph::build(&program, &GraphLens::default());
    let mut done: HashSet<MethodId> = HashSet::new();

    while !graph.is_empty() {
        let batch = graph.pick_leaves()?;
        assert!(!batch.is_empty());
        for method in batch.methods() {
            for callee in graph.callees(method) {
                assert!(
                    done.contains(&callee) || graph.is_breaker(method, &callee),
                    "{method} scheduled before {callee}"
                );
            }
        }
        done.extend(batch.methods().iter().cloned());
    }
    assert_eq!(done.len(), 9);
    Ok(())
}

#[test]
fn test_every_method_processed_once() -> Result<()> {
    let mut program = program(vec![
        caller("p.A.top()void", &["p.A.mid()void", "lib.L.io()void"]),
        caller("p.A.mid()void", &["p.A.leaf()void", "lib.L.io()void"]),
        caller("p.A.leaf()void", &["lib.L.io()void"]),
    ]);
    let mut interface = ProgramClass::new(TypeName::new("p.Shape"), ClassFlags::PUBLIC);
    interface.add_method(EncodedMethod::new(
        MethodId::parse("p.Shape.area()int").unwrap(),
        MethodFlags::PUBLIC | MethodFlags::ABSTRACT,
        None,
    ));
    program.add_class(interface)?;

    let converter = Converter::new(CompilerOptions::default())?;
    converter.optimize(&mut program)?;

    for method in program.methods() {
        assert_eq!(method.info.process_count, 1, "{}", method.id);
        assert!(!method.is_processed(), "{} still marked", method.id);
    }
    let order: Vec<String> = converter
        .events()
        .filter_kind(EventKind::MethodProcessed)
        .filter_map(|e| e.method.as_ref().map(|m| m.name.to_string()))
        .collect();
    assert_eq!(order, ["leaf", "mid", "top"]);
    Ok(())
}

#[test]
fn test_cycle_broken_batches_reported() -> Result<()> {
    let mut program = program(vec![
        caller("p.A.ping()void", &["p.A.pong()void", "lib.L.io()void"]),
        caller("p.A.pong()void", &["p.A.ping()void", "lib.L.io()void"]),
    ]);
    let converter = Converter::new(CompilerOptions::default())?;
    converter.optimize(&mut program)?;
    assert_eq!(converter.events().count_kind(EventKind::CycleBroken), 1);
    assert_eq!(converter.events().count_kind(EventKind::BatchStarted), 2);
    Ok(())
}
