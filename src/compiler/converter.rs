//! The method scheduler and code generation driver.
//!
//! [`Converter::optimize`] runs the whole-program schedule:
//!
//! 1. **Discovery.** The call graph hands out leaf batches, callees before callers. Every
//!    method of a batch is lifted, run through [`Pipeline::standard`] with the outliner
//!    collecting candidates, register allocated and lowered. Batches that were produced by
//!    breaking a cycle run sequentially; other batches run on the thread pool. Whatever a
//!    method run found that matters beyond the method (highest string, double-inline
//!    requests, outline candidates) is merged after the batch, in batch order, so parallel and
//!    sequential runs produce the same program.
//! 2. **Double inlining.** Callers that met a callee before it was processed are optimized once
//!    more with the permissive inliner.
//! 3. **Outlining.** Shapes seen often enough become methods of one synthesized support class.
//!    The class is compiled, then every method holding a selected shape is optimized a second
//!    time with the outliner replacing the occurrences.
//! 4. **Finalization.** Lambda, backport and companion classes are synthesized and compiled,
//!    and every processed flag is cleared.
//!
//! [`Converter::convert`] is the non-optimizing variant: every method once, in program order,
//! through [`Pipeline::conversion`].

use std::{collections::HashMap, fmt, sync::Arc};

use rayon::prelude::*;

use crate::{
    analysis::{CallGraph, GraphLens, IrBuilder, IrCode, Leaves, RegisterIrBuilder},
    compiler::{
        desugar::{interfaces, twr, LambdaRewriter, BACKPORT_CLASS},
        inliner::{self, DoubleInlining, Inliner},
        lowering::{CodeEncoder, RegisterEncoder},
        outliner::Outliner,
        passes::deadcode,
        printer::CfgPrinter,
        regalloc::{peephole, LinearScanAllocator},
        CompilerOptions, EventKind, EventLog, MethodSummary, OutlineMode, PassContext, Pipeline,
    },
    program::{InliningConstraint, MethodId, Program, ProgramClass, RawCode, TypeName},
    Error, Result,
};

/// What a compilation produced besides the rewritten program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionOutput {
    /// The lexicographically highest string literal referenced by the compiled code, for the
    /// string pool encoder.
    pub highest_sorting_string: Option<String>,
    /// Synthesized classes in the order they were appended to the program.
    pub synthesized_classes: Vec<TypeName>,
    /// Number of sequences replaced by outline calls.
    pub outlined: usize,
}

/// How the methods of one schedule step are compiled.
#[derive(Clone, Copy)]
struct Stage<'a> {
    pipeline: &'a Pipeline,
    inliner: Option<&'a Inliner>,
    call_graph: Option<&'a CallGraph>,
    lambdas: Option<&'a LambdaRewriter>,
    outline: OutlineMode<'a>,
    propagate_member_values: bool,
}

impl<'a> Stage<'a> {
    /// Synthesized classes and conversion: no inlining and no outlining.
    fn plain(pipeline: &'a Pipeline, lambdas: Option<&'a LambdaRewriter>) -> Self {
        Self {
            pipeline,
            inliner: None,
            call_graph: None,
            lambdas,
            outline: OutlineMode::Disabled,
            propagate_member_values: true,
        }
    }
}

/// The outcome of compiling one method, applied to the program after the batch.
struct Processed {
    id: MethodId,
    /// `None` keeps the current code
    code: Option<RawCode>,
    constraint: InliningConstraint,
    is_simple: bool,
    summary: MethodSummary,
}

impl Processed {
    fn skipped(id: &MethodId) -> Self {
        Self {
            id: id.clone(),
            code: None,
            constraint: InliningConstraint::Never,
            is_simple: false,
            summary: MethodSummary::default(),
        }
    }
}

/// Cross-method results, folded in batch order.
#[derive(Default)]
struct Reduction {
    highest_string: Option<String>,
    double_inlining: DoubleInlining,
    outliner: Outliner,
    twr_backport_used: bool,
    outlined: usize,
}

impl Reduction {
    fn fold_string(&mut self, candidate: &str) {
        if self
            .highest_string
            .as_deref()
            .map_or(true, |highest| candidate > highest)
        {
            self.highest_string = Some(candidate.to_string());
        }
    }
}

/// Library methods that return their receiver.
fn library_returns() -> HashMap<MethodId, usize> {
    const BUILDERS: [&str; 2] = ["java.lang.StringBuilder", "java.lang.StringBuffer"];
    const ARGUMENTS: [&str; 9] = [
        "java.lang.String",
        "java.lang.Object",
        "java.lang.CharSequence",
        "int",
        "long",
        "char",
        "boolean",
        "float",
        "double",
    ];
    BUILDERS
        .iter()
        .flat_map(|builder| {
            ARGUMENTS.iter().filter_map(move |arg| {
                MethodId::parse(&format!("{builder}.append({arg}){builder}"))
            })
        })
        .map(|id| (id, 0))
        .collect()
}

/// Drives the compilation of a program.
///
/// # Examples
///
/// ```rust
/// use dexopt::{program::Program, CompilerOptions, Converter};
///
/// let converter = Converter::new(CompilerOptions::default())?;
/// let mut program = Program::new();
/// let output = converter.optimize(&mut program)?;
/// assert!(output.synthesized_classes.is_empty());
/// # Ok::<(), dexopt::Error>(())
/// ```
pub struct Converter {
    options: CompilerOptions,
    lens: GraphLens,
    builder: Box<dyn IrBuilder>,
    encoder: Box<dyn CodeEncoder>,
    printer: Option<Arc<dyn CfgPrinter>>,
    events: EventLog,
    library_returns: HashMap<MethodId, usize>,
    pool: rayon::ThreadPool,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("options", &self.options)
            .field("lens", &self.lens)
            .field("printer", &self.printer.is_some())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// Creates a converter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the options conflict or the worker pool cannot be
    /// started.
    pub fn new(options: CompilerOptions) -> Result<Self> {
        options.validate()?;
        let mut pool = rayon::ThreadPoolBuilder::new();
        if options.num_threads > 0 {
            pool = pool.num_threads(options.num_threads);
        }
        let pool = pool.build().map_err(|e| {
            Error::Configuration(format!(
                "Cannot start {} worker threads: {e}. Check num_threads.",
                options.num_threads
            ))
        })?;
        Ok(Self {
            options,
            lens: GraphLens::default(),
            builder: Box::new(RegisterIrBuilder),
            encoder: Box::new(RegisterEncoder),
            printer: None,
            events: EventLog::new(),
            library_returns: library_returns(),
            pool,
        })
    }

    /// Sets the pending member rewrites.
    #[must_use]
    pub fn with_lens(mut self, lens: GraphLens) -> Self {
        self.lens = lens;
        self
    }

    /// Replaces the IR builder.
    #[must_use]
    pub fn with_builder(mut self, builder: Box<dyn IrBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Replaces the encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Box<dyn CodeEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Sends code dumps to `printer`.
    #[must_use]
    pub fn with_printer(mut self, printer: Arc<dyn CfgPrinter>) -> Self {
        self.printer = Some(printer);
        self
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Returns the change journal of every compilation run by this converter.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Optimizes every method of `program` and appends the synthesized classes.
    ///
    /// # Errors
    ///
    /// Returns the first error of any method; the program is left partially rewritten.
    /// [`Error::CallGraph`] if the schedule cannot make progress.
    pub fn optimize(&self, program: &mut Program) -> Result<ConversionOutput> {
        let lambdas = self.prepare(program);
        let standard = Pipeline::standard();
        let mut reduction = Reduction::default();
        let mut synthesized = Vec::new();

        // Phase 1
        let inliner = Inliner::new(&self.options.inlining);
        let outline = if self.options.outline.enabled {
            OutlineMode::Identify
        } else {
            OutlineMode::Disabled
        };
        let mut graph = CallGraph::build(program, &self.lens);
        let stats = graph.stats();
        log::debug!(
            "call graph: {} methods, {} edges, {:.1}% of call sites resolved",
            stats.method_count,
            stats.edge_count,
            stats.resolution_rate()
        );
        let mut batch_number = 0usize;
        while !graph.is_empty() {
            let batch = graph.pick_leaves()?;
            batch_number += 1;
            self.events
                .record(EventKind::BatchStarted)
                .message(format!("batch {batch_number}: {} methods", batch.len()));
            if batch.broke_cycles() {
                self.events
                    .record(EventKind::CycleBroken)
                    .message(format!("batch {batch_number} runs sequentially"));
            }
            let stage = Stage {
                pipeline: &standard,
                inliner: Some(&inliner),
                call_graph: Some(&graph),
                lambdas: lambdas.as_ref(),
                outline,
                propagate_member_values: true,
            };
            self.run_batch(program, &batch, stage, &mut reduction)?;
        }

        // Double inlining
        if !reduction.double_inlining.is_empty() {
            let callers = reduction.double_inlining.callers().to_vec();
            log::debug!("revisiting {} double-inline callers", callers.len());
            let permissive = Inliner::permissive(
                &self.options.inlining,
                reduction.double_inlining.targets().clone(),
            );
            let stage = Stage {
                inliner: Some(&permissive),
                ..Stage::plain(&standard, lambdas.as_ref())
            };
            self.reprocess(program, &callers, stage, &mut reduction)?;
        }

        // Phase 2
        if self.options.outline.enabled {
            let selection = reduction.outliner.select(program, &self.options.outline);
            if !selection.is_empty() {
                log::debug!(
                    "outlining {} of {} candidate shapes",
                    selection.len(),
                    reduction.outliner.candidate_count()
                );
                let class = selection.build_class()?;
                synthesized.push(class.ty.clone());
                self.compile_class(
                    program,
                    class,
                    Stage::plain(&standard, None),
                    &mut reduction,
                )?;
                let stage = Stage {
                    outline: OutlineMode::Apply(&selection),
                    ..Stage::plain(&standard, lambdas.as_ref())
                };
                let methods = selection.methods_to_reprocess().to_vec();
                self.reprocess(program, &methods, stage, &mut reduction)?;
            }
        }

        synthesized.extend(self.finish_desugaring(
            program,
            lambdas.as_ref(),
            &standard,
            &mut reduction,
        )?);
        Self::clear_processed(program);

        Ok(ConversionOutput {
            highest_sorting_string: reduction.highest_string,
            synthesized_classes: synthesized,
            outlined: reduction.outlined,
        })
    }

    /// Converts every method without optimizing it: lens rewriting, dead code removal and
    /// desugaring only, in program order.
    ///
    /// # Errors
    ///
    /// Returns the first error of any method.
    pub fn convert(&self, program: &mut Program) -> Result<ConversionOutput> {
        let lambdas = self.prepare(program);
        let conversion = Pipeline::conversion();
        let stage = Stage {
            propagate_member_values: false,
            ..Stage::plain(&conversion, lambdas.as_ref())
        };
        let mut reduction = Reduction::default();
        let methods: Vec<MethodId> = program
            .methods()
            .filter(|m| !m.is_processed())
            .map(|m| m.id.clone())
            .collect();
        for id in &methods {
            let processed = self.process(program, id, stage)?;
            self.commit(program, processed, &mut reduction)?;
        }
        let synthesized =
            self.finish_desugaring(program, lambdas.as_ref(), &conversion, &mut reduction)?;
        Self::clear_processed(program);

        Ok(ConversionOutput {
            highest_sorting_string: reduction.highest_string,
            synthesized_classes: synthesized,
            outlined: 0,
        })
    }

    /// Re-encodes `method` so that string constants sorting at or after `first_jumbo_string`
    /// use the wide encoding. The code is lifted, allocated and lowered again, nothing more.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `method` is not in the program, and the errors of the
    /// builder, the allocator and the encoder.
    pub fn process_jumbo_strings(
        &self,
        program: &mut Program,
        method: &MethodId,
        first_jumbo_string: &str,
    ) -> Result<()> {
        let code = {
            let encoded = program
                .method(method)
                .ok_or_else(|| malformed_error!("Method {} is not in the program", method))?;
            let Some(mut code) = self.builder.build_ir(encoded)? else {
                return Ok(());
            };
            let ins = encoded.code.as_ref().map_or(0, |raw| raw.ins);
            let mut ctx = PassContext::new(program, &self.options, encoded, &self.events);
            deadcode::run(&mut code, &mut ctx)?;
            self.generate(&mut code, ins, Some(first_jumbo_string))?
        };
        if let Some(encoded) = program.method_mut(method) {
            self.events
                .record(EventKind::CodeRegenerated)
                .method(method.clone())
                .message(format!(
                    "{} instructions, jumbo strings from {first_jumbo_string:?}",
                    code.instruction_count()
                ));
            encoded.code = Some(code);
        }
        Ok(())
    }

    /// Removes lambda deserialization hooks, marks methods without IR processed and names the
    /// lambda classes.
    fn prepare(&self, program: &mut Program) -> Option<LambdaRewriter> {
        for method in program.methods_mut() {
            if method.code.is_none() || method.is_abstract_or_native() {
                method.mark_processed(InliningConstraint::Never);
            }
        }
        if !self.options.desugar_lambdas {
            return None;
        }
        let removed = LambdaRewriter::remove_deserialization_methods(program);
        if removed > 0 {
            log::debug!("removed {removed} lambda deserialization methods");
        }
        Some(LambdaRewriter::new(program))
    }

    fn clear_processed(program: &mut Program) {
        for method in program.methods_mut() {
            method.mark_not_processed();
        }
    }

    fn run_batch(
        &self,
        program: &mut Program,
        batch: &Leaves,
        stage: Stage<'_>,
        reduction: &mut Reduction,
    ) -> Result<()> {
        if self.options.parallel_leaves && !batch.broke_cycles() && batch.len() > 1 {
            let results = {
                let program: &Program = program;
                self.pool.install(|| {
                    batch
                        .methods()
                        .par_iter()
                        .map(|id| self.process(program, id, stage))
                        .collect::<Result<Vec<_>>>()
                })?
            };
            for processed in results {
                self.commit(program, processed, reduction)?;
            }
        } else {
            for id in batch.methods() {
                let processed = self.process(program, id, stage)?;
                self.commit(program, processed, reduction)?;
            }
        }
        Ok(())
    }

    /// Optimizes already processed `methods` once more, sequentially in the given order.
    fn reprocess(
        &self,
        program: &mut Program,
        methods: &[MethodId],
        stage: Stage<'_>,
        reduction: &mut Reduction,
    ) -> Result<()> {
        for id in methods {
            let method = program
                .method_mut(id)
                .ok_or_else(|| invariant_error!("{} left the program before reprocessing", id))?;
            method.mark_not_processed();
            let processed = self.process(program, id, stage)?;
            self.commit(program, processed, reduction)?;
        }
        Ok(())
    }

    fn compile_class(
        &self,
        program: &mut Program,
        class: ProgramClass,
        stage: Stage<'_>,
        reduction: &mut Reduction,
    ) -> Result<()> {
        let methods: Vec<MethodId> = class.methods().map(|m| m.id.clone()).collect();
        self.events
            .record(EventKind::ClassSynthesized)
            .message(format!("{} with {} methods", class.ty, methods.len()));
        program.add_class(class)?;
        for id in &methods {
            let processed = self.process(program, id, stage)?;
            self.commit(program, processed, reduction)?;
        }
        Ok(())
    }

    /// Appends the lambda, backport and companion classes.
    fn finish_desugaring(
        &self,
        program: &mut Program,
        lambdas: Option<&LambdaRewriter>,
        pipeline: &Pipeline,
        reduction: &mut Reduction,
    ) -> Result<Vec<TypeName>> {
        let mut synthesized = Vec::new();
        if let Some(lambdas) = lambdas {
            lambdas.adjust_accessibility(program);
            for class in lambdas.synthesize_classes()? {
                synthesized.push(class.ty.clone());
                self.compile_class(program, class, Stage::plain(pipeline, None), reduction)?;
            }
        }
        if reduction.twr_backport_used
            && program
                .definition_for(&TypeName::new(BACKPORT_CLASS))
                .is_none()
        {
            let class = twr::backport_class()?;
            synthesized.push(class.ty.clone());
            self.compile_class(program, class, Stage::plain(pipeline, None), reduction)?;
        }
        if self.options.enable_interface_method_desugaring() {
            for companion in interfaces::move_static_methods(program)? {
                self.events
                    .record(EventKind::ClassSynthesized)
                    .message(format!("{companion} companion"));
                synthesized.push(companion);
            }
        }
        Ok(synthesized)
    }

    fn print(&self, method: &MethodId, title: &str, code: &dyn fmt::Display) {
        if let Some(printer) = &self.printer {
            printer.print(method, title, code);
        }
    }

    /// Compiles one method against the current program. Does not change the program.
    fn process(&self, program: &Program, id: &MethodId, stage: Stage<'_>) -> Result<Processed> {
        let method = program
            .method(id)
            .ok_or_else(|| invariant_error!("Scheduled method {} is not in the program", id))?;
        if !self.options.method_matches_filter(id) {
            return Ok(Processed::skipped(id));
        }
        let Some(mut code) = self.builder.build_ir(method)? else {
            return Ok(Processed::skipped(id));
        };
        let ins = method.code.as_ref().map_or(0, |raw| raw.ins);
        self.print(id, "Initial IR (SSA)", &code);

        let mut ctx = PassContext::new(program, &self.options, method, &self.events)
            .with_lens(&self.lens)
            .with_builder(self.builder.as_ref())
            .with_library_returns(&self.library_returns)
            .with_outline(stage.outline);
        ctx.propagate_member_values = stage.propagate_member_values;
        if let Some(inliner) = stage.inliner {
            ctx = ctx.with_inliner(inliner, stage.call_graph);
        }
        if let Some(lambdas) = stage.lambdas {
            ctx = ctx.with_lambdas(lambdas);
        }

        stage.pipeline.run(&mut code, &mut ctx)?;
        deadcode::run(&mut code, &mut ctx)?;
        self.print(id, "Optimized IR (SSA)", &code);

        let max_size = self.options.inlining.simple_method_max_size;
        let is_simple = inliner::identify_simple_method(&code, id, max_size);
        let constraint = inliner::compute_constraint(&code, method, program, max_size);
        let summary = ctx.summary;
        let raw = self.generate(&mut code, ins, None)?;

        Ok(Processed {
            id: id.clone(),
            code: Some(raw),
            constraint,
            is_simple,
            summary,
        })
    }

    /// Allocates registers, cleans up and lowers.
    fn generate(
        &self,
        code: &mut IrCode,
        ins: u16,
        first_jumbo_string: Option<&str>,
    ) -> Result<RawCode> {
        let allocator = LinearScanAllocator::new(&self.options, &self.events);
        let mut registers = allocator.allocate(code, ins)?;
        self.print(&registers.method, "After register allocation", &registers);
        peephole::run(&mut registers, &self.options, &self.events);
        self.print(&registers.method, "Final IR (non-SSA)", &registers);
        log::trace!("{registers}");
        self.encoder.lower_to_code(&registers, first_jumbo_string)
    }

    /// Installs the result of one method and folds its summary.
    fn commit(
        &self,
        program: &mut Program,
        processed: Processed,
        reduction: &mut Reduction,
    ) -> Result<()> {
        let Processed {
            id,
            code,
            constraint,
            is_simple,
            summary,
        } = processed;
        let method = program
            .method_mut(&id)
            .ok_or_else(|| invariant_error!("{} left the program while being compiled", id))?;
        if let Some(code) = code {
            self.events
                .record(EventKind::CodeRegenerated)
                .method(id.clone())
                .message(format!(
                    "{} registers, {} instructions",
                    code.registers,
                    code.instruction_count()
                ));
            method.code = Some(code);
        }
        method.info.returns_argument = summary.returns_argument;
        method.info.is_simple = is_simple;
        method.mark_processed(constraint);
        self.events
            .record(EventKind::MethodProcessed)
            .method(id.clone())
            .message(format!("inlining constraint {constraint}"));

        if let Some(highest) = method.code.as_ref().and_then(RawCode::highest_string) {
            let highest = highest.to_string();
            reduction.fold_string(&highest);
        }
        reduction
            .double_inlining
            .record(&id, &summary.double_inline_targets);
        reduction.outliner.record(&id, summary.outline_candidates);
        reduction.twr_backport_used |= summary.twr_backport_used;
        reduction.outlined += summary.outlined;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::printer::TextCfgPrinter,
        program::{IfCond, RawInstruction},
        test::{method_from, program_with, static_method, Interpreter, Value},
    };

    fn processed_order(converter: &Converter) -> Vec<String> {
        converter
            .events()
            .filter_kind(EventKind::MethodProcessed)
            .filter_map(|e| e.method.as_ref().map(|m| m.name.to_string()))
            .collect()
    }

    fn invokes<'a>(program: &'a Program, method: &str) -> Vec<&'a MethodId> {
        let id = MethodId::parse(method).unwrap();
        program
            .method(&id)
            .unwrap()
            .code
            .as_ref()
            .unwrap()
            .instructions
            .iter()
            .filter_map(|i| match i {
                RawInstruction::Invoke { method, .. } => Some(method),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_callees_before_callers() {
        let mut program = program_with(vec![
            static_method("p.A.top()void", &["p.A.mid()void", "lib.L.io()void"]),
            static_method("p.A.mid()void", &["p.A.leaf()void", "lib.L.io()void"]),
            static_method("p.A.leaf()void", &["lib.L.io()void"]),
        ]);
        let converter = Converter::new(CompilerOptions::default()).unwrap();
        converter.optimize(&mut program).unwrap();

        assert_eq!(processed_order(&converter), ["leaf", "mid", "top"]);
        assert_eq!(converter.events().count_kind(EventKind::BatchStarted), 3);
        for method in program.methods() {
            assert_eq!(method.info.process_count, 1, "{}", method.id);
            assert!(!method.is_processed());
        }
    }

    #[test]
    fn test_abstract_methods_processed_once() {
        let mut program = program_with(vec![static_method("p.A.f()void", &[])]);
        let abstract_method = crate::program::EncodedMethod::new(
            MethodId::parse("p.A.g()void").unwrap(),
            crate::program::MethodFlags::PUBLIC | crate::program::MethodFlags::ABSTRACT,
            None,
        );
        program.classes_mut()[0].add_method(abstract_method);
        let converter = Converter::new(CompilerOptions::default()).unwrap();
        converter.optimize(&mut program).unwrap();
        for method in program.methods() {
            assert_eq!(method.info.process_count, 1, "{}", method.id);
        }
    }

    /// `f` calls `g`, and `g` calls `f` on a branch that constant folding removes. The cycle is
    /// broken at `f`, so `f` meets an unprocessed `g` and is revisited.
    fn cycle() -> Program {
        let f = method_from("a.A.f()int", 1, |asm| {
            asm.invoke_static(MethodId::parse("b.B.g()int").unwrap(), &[])
                .move_result(0)
                .return_value(0);
        });
        let g = method_from("b.B.g()int", 2, |asm| {
            let skip = asm.new_label();
            asm.const_int(0, 0)
                .if_zero(IfCond::Eq, 0, skip)
                .invoke_static(MethodId::parse("a.A.f()int").unwrap(), &[])
                .bind(skip)
                .const_int(1, 7)
                .return_value(1);
        });
        program_with(vec![f, g])
    }

    #[test]
    fn test_double_inline_caller_revisited() {
        let mut program = cycle();
        let converter = Converter::new(CompilerOptions::default()).unwrap();
        converter.optimize(&mut program).unwrap();

        assert_eq!(converter.events().count_kind(EventKind::CycleBroken), 1);
        assert!(converter.events().has(EventKind::DoubleInlineRequested));
        let f = program.method(&MethodId::parse("a.A.f()int").unwrap()).unwrap();
        assert_eq!(f.info.process_count, 2);
        assert!(invokes(&program, "a.A.f()int").is_empty());
        assert_eq!(
            Interpreter::new(&program).run("a.A.f()int", &[]),
            Ok(Value::Int(7))
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let methods = || {
            vec![
                static_method("p.A.a()void", &["p.A.c()void", "lib.L.io()void"]),
                static_method("p.A.b()void", &["p.A.c()void", "lib.L.io()void"]),
                static_method("p.A.c()void", &["lib.L.io()void"]),
                static_method("p.A.d()void", &["lib.L.io()void"]),
            ]
        };
        let render = |program: &Program| -> Vec<String> {
            program
                .methods()
                .map(|m| m.code.as_ref().unwrap().to_string())
                .collect()
        };

        let mut parallel = program_with(methods());
        Converter::new(CompilerOptions::default().with_threads(4, true))
            .unwrap()
            .optimize(&mut parallel)
            .unwrap();
        let mut sequential = program_with(methods());
        Converter::new(CompilerOptions::default().with_threads(1, false))
            .unwrap()
            .optimize(&mut sequential)
            .unwrap();
        assert_eq!(render(&parallel), render(&sequential));
    }

    #[test]
    fn test_configuration_checked_first() {
        let options = CompilerOptions {
            max_registers: 0,
            ..CompilerOptions::default()
        };
        assert!(matches!(
            Converter::new(options),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_printer_receives_every_stage() {
        let mut program = program_with(vec![static_method("p.A.f()int", &[])]);
        let printer = Arc::new(TextCfgPrinter::new());
        let converter = Converter::new(CompilerOptions::default())
            .unwrap()
            .with_printer(printer.clone());
        converter.optimize(&mut program).unwrap();
        let text = printer.contents();
        for title in [
            "Initial IR (SSA)",
            "Optimized IR (SSA)",
            "After register allocation",
            "Final IR (non-SSA)",
        ] {
            assert!(text.contains(&format!("p.A.f()int: {title}")), "{title}");
        }
    }

    #[test]
    fn test_highest_string_tracked() {
        let method = |name: &str, value: &'static str| {
            method_from(&format!("p.A.{name}()java.lang.String"), 1, move |asm| {
                asm.const_string(0, value).return_value(0);
            })
        };
        let mut program = program_with(vec![method("f", "apple"), method("g", "pear")]);
        let converter = Converter::new(CompilerOptions::default()).unwrap();
        let output = converter.optimize(&mut program).unwrap();
        assert_eq!(output.highest_sorting_string.as_deref(), Some("pear"));
    }

    #[test]
    fn test_convert_keeps_calls() {
        let callee = method_from("p.A.one()int", 1, |asm| {
            asm.const_int(0, 1).return_value(0);
        });
        let caller = method_from("p.A.f()int", 1, |asm| {
            asm.invoke_static(MethodId::parse("p.A.one()int").unwrap(), &[])
                .move_result(0)
                .return_value(0);
        });
        let mut program = program_with(vec![callee, caller]);
        let converter = Converter::new(CompilerOptions::default()).unwrap();
        converter.convert(&mut program).unwrap();

        assert_eq!(invokes(&program, "p.A.f()int").len(), 1);
        assert!(!converter.events().has(EventKind::MethodInlined));
        assert_eq!(
            Interpreter::new(&program).run("p.A.f()int", &[]),
            Ok(Value::Int(1))
        );
    }

    #[test]
    fn test_jumbo_strings_widened() {
        let id = MethodId::parse("p.A.f()java.lang.String").unwrap();
        let mut program = program_with(vec![method_from(
            "p.A.f()java.lang.String",
            1,
            |asm| {
                asm.const_string(0, "zebra").return_value(0);
            },
        )]);
        let converter = Converter::new(CompilerOptions::default()).unwrap();
        converter
            .process_jumbo_strings(&mut program, &id, "m")
            .unwrap();
        let code = program.method(&id).unwrap().code.as_ref().unwrap();
        assert!(code.instructions.iter().any(|i| matches!(
            i,
            RawInstruction::ConstString { jumbo: true, .. }
        )));
        assert!(converter
            .process_jumbo_strings(&mut program, &MethodId::parse("p.A.g()void").unwrap(), "m")
            .is_err());
    }
}
