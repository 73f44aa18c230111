//! Benchmarks for whole-program optimization.
//!
//! Measures the converter on generated programs:
//! - Call chains (one leaf batch per level)
//! - Wide layers (large parallel batches)
//! - Repeated sequences with outlining enabled
//! - Conversion without optimization

extern crate dexopt;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use dexopt::prelude::*;
use std::hint::black_box;

fn id(class: usize, method: usize) -> MethodId {
    MethodId::parse(&format!("bench.C{class}.m{method}(int)int")).unwrap()
}

/// Each method loops `x` times over a small expression and calls up to two methods of the
/// next layer.
fn body(callees: &[MethodId]) -> RawCode {
    let mut asm = CodeAssembler::new(6, 1);
    let head = asm.new_label();
    let exit = asm.new_label();
    asm.const_int(1, 0).const_int(2, 0).const_int(3, 1);
    asm.bind(head)
        .if_cmp(IfCond::Ge, 2, 0, exit)
        .const_int(4, 3)
        .mul_int(4, 4, 2)
        .add_int(1, 1, 4)
        .add_int(2, 2, 3)
        .goto(head)
        .bind(exit);
    for callee in callees {
        asm.invoke_static(callee.clone(), &[1])
            .move_result(5)
            .add_int(1, 1, 5);
    }
    asm.return_value(1);
    asm.finish().unwrap()
}

/// `layers` layers of `width` classes with `methods` methods each.
fn layered_program(layers: usize, width: usize, methods: usize) -> Program {
    let mut program = Program::new();
    for layer in 0..layers {
        for column in 0..width {
            let class_index = layer * width + column;
            let mut class = ProgramClass::new(
                TypeName::new(&format!("bench.C{class_index}")),
                ClassFlags::PUBLIC,
            );
            for method in 0..methods {
                let callees: Vec<MethodId> = if layer + 1 < layers {
                    let next = (layer + 1) * width;
                    vec![
                        id(next + column, method),
                        id(next + (column + 1) % width, method),
                    ]
                } else {
                    Vec::new()
                };
                class.add_method(EncodedMethod::new(
                    id(class_index, method),
                    MethodFlags::PUBLIC | MethodFlags::STATIC,
                    Some(body(&callees)),
                ));
            }
            program.add_class(class).unwrap();
        }
    }
    program
}

fn bench_optimize_chain(c: &mut Criterion) {
    let program = layered_program(16, 1, 4);
    let converter = Converter::new(CompilerOptions::default()).unwrap();

    c.bench_function("optimize_chain", |b| {
        b.iter_batched(
            || program.clone(),
            |mut program| {
                let output = converter.optimize(black_box(&mut program)).unwrap();
                black_box(output)
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_optimize_wide(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize_wide");
    let program = layered_program(4, 16, 4);

    for (name, options) in [
        ("sequential", CompilerOptions::default().with_threads(1, false)),
        ("parallel", CompilerOptions::default().with_threads(0, true)),
    ] {
        let converter = Converter::new(options).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &program, |b, program| {
            b.iter_batched(
                || program.clone(),
                |mut program| black_box(converter.optimize(&mut program).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_optimize_outlining(c: &mut Criterion) {
    let program = layered_program(2, 8, 8);
    let converter = Converter::new(CompilerOptions::default().with_outline(4, 3, 6)).unwrap();

    c.bench_function("optimize_outlining", |b| {
        b.iter_batched(
            || program.clone(),
            |mut program| black_box(converter.optimize(&mut program).unwrap()),
            BatchSize::SmallInput,
        );
    });
}

fn bench_convert(c: &mut Criterion) {
    let program = layered_program(4, 8, 4);
    let converter = Converter::new(CompilerOptions::default()).unwrap();

    c.bench_function("convert", |b| {
        b.iter_batched(
            || program.clone(),
            |mut program| black_box(converter.convert(&mut program).unwrap()),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_optimize_chain,
    bench_optimize_wide,
    bench_optimize_outlining,
    bench_convert
);
criterion_main!(benches);
