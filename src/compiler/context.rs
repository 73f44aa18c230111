//! Per-method pass context.
//!
//! A [`PassContext`] is created for every method the converter optimizes. It gives the passes
//! read access to the program (callees optimized in earlier batches included) and to the
//! shared compiler components, and collects what the method run produced in a
//! [`MethodSummary`]. Nothing in the context is shared mutably between methods: results that
//! affect other methods are merged by the converter after the batch.

use std::collections::HashMap;

use crate::{
    analysis::{CallGraph, GraphLens, IrBuilder, RegisterIrBuilder},
    compiler::{
        desugar::LambdaRewriter,
        outliner::{OutlineSelection, OutlineShape},
        CompilerOptions, EventLog, Inliner,
    },
    program::{EncodedMethod, MethodId, Program},
};

/// What the outlining pass does in the current run.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutlineMode<'a> {
    /// The pass is skipped
    #[default]
    Disabled,
    /// Candidate sequences are collected into the summary, code is not changed
    Identify,
    /// Occurrences of the selected shapes are replaced by calls
    Apply(&'a OutlineSelection),
}

/// Results of optimizing one method that matter beyond the method itself.
#[derive(Debug, Clone, Default)]
pub struct MethodSummary {
    /// Index of the argument every return returns, receiver included.
    pub returns_argument: Option<usize>,

    /// Callees whose body was inlined, once per inlined call site.
    pub inlined: Vec<MethodId>,

    /// Callees that could not be inlined yet because they were not processed or the edge was
    /// broken; the caller is revisited once they are.
    pub double_inline_targets: Vec<MethodId>,

    /// Outline candidate occurrences in discovery order.
    pub outline_candidates: Vec<OutlineShape>,

    /// Number of sequences replaced by calls to outline methods.
    pub outlined: usize,

    /// A suppressed-exception call was routed to the backport class.
    pub twr_backport_used: bool,
}

/// State handed to every pass of the pipeline for one method.
pub struct PassContext<'a> {
    /// The program; the method being optimized still carries its old code.
    pub program: &'a Program,
    /// Compiler options.
    pub options: &'a CompilerOptions,
    /// The method being optimized.
    pub method: &'a EncodedMethod,
    /// Pending member rewrites.
    pub lens: &'a GraphLens,
    /// Change journal.
    pub events: &'a EventLog,
    /// Lifts callee code for the inliner.
    pub builder: &'a dyn IrBuilder,
    /// The call graph of the current schedule, used to detect broken edges.
    pub call_graph: Option<&'a CallGraph>,
    /// The inliner, `None` when not inlining.
    pub inliner: Option<&'a Inliner>,
    /// The lambda rewriter, `None` when lambdas are kept.
    pub lambdas: Option<&'a LambdaRewriter>,
    /// Outlining mode.
    pub outline: OutlineMode<'a>,
    /// Replace reads of constant static fields by their value.
    pub propagate_member_values: bool,
    /// Library methods known to return one of their arguments.
    pub library_returns: Option<&'a HashMap<MethodId, usize>>,
    /// Results collected while the passes run.
    pub summary: MethodSummary,
}

impl<'a> PassContext<'a> {
    /// Creates a context with no inliner, no outlining and no desugaring.
    #[must_use]
    pub fn new(
        program: &'a Program,
        options: &'a CompilerOptions,
        method: &'a EncodedMethod,
        events: &'a EventLog,
    ) -> Self {
        static IDENTITY: GraphLens = GraphLens::identity();
        static BUILDER: RegisterIrBuilder = RegisterIrBuilder;
        Self {
            program,
            options,
            method,
            lens: &IDENTITY,
            events,
            builder: &BUILDER,
            call_graph: None,
            inliner: None,
            lambdas: None,
            outline: OutlineMode::Disabled,
            propagate_member_values: true,
            library_returns: None,
            summary: MethodSummary::default(),
        }
    }

    /// Sets the lens.
    #[must_use]
    pub fn with_lens(mut self, lens: &'a GraphLens) -> Self {
        self.lens = lens;
        self
    }

    /// Sets the IR builder used for callees.
    #[must_use]
    pub fn with_builder(mut self, builder: &'a dyn IrBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Enables inlining.
    #[must_use]
    pub fn with_inliner(mut self, inliner: &'a Inliner, call_graph: Option<&'a CallGraph>) -> Self {
        self.inliner = Some(inliner);
        self.call_graph = call_graph;
        self
    }

    /// Enables lambda rewriting.
    #[must_use]
    pub fn with_lambdas(mut self, lambdas: &'a LambdaRewriter) -> Self {
        self.lambdas = Some(lambdas);
        self
    }

    /// Sets the outlining mode.
    #[must_use]
    pub fn with_outline(mut self, mode: OutlineMode<'a>) -> Self {
        self.outline = mode;
        self
    }

    /// Sets the table of library methods returning an argument.
    #[must_use]
    pub fn with_library_returns(mut self, table: &'a HashMap<MethodId, usize>) -> Self {
        self.library_returns = Some(table);
        self
    }

    /// Returns the method identity.
    #[must_use]
    pub fn method_id(&self) -> &MethodId {
        &self.method.id
    }

    /// Returns the index of the argument `callee` always returns, if known.
    ///
    /// Program methods report what their last optimization found; library methods are looked
    /// up in the registered table.
    #[must_use]
    pub fn returns_argument(&self, callee: &MethodId) -> Option<usize> {
        match self.program.method(callee) {
            Some(method) => method.info.returns_argument,
            None => self
                .library_returns
                .and_then(|table| table.get(callee).copied()),
        }
    }
}
