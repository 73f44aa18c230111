//! Method-level optimization and code generation.
//!
//! This module turns the SSA built by [`crate::analysis`] back into register code:
//!
//! - [`crate::analysis`] - raw code → SSA, call graph, graph lens
//! - [`compiler`](self) - optimization pipeline, register allocation, lowering
//! - [`crate::program`] - the program model the results are written back to
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Converter                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CallGraph::pick_leaves     callee-first batches                 │
//! │    ├─ Phase 1: Discovery     (optimize, collect outline shapes)  │
//! │    ├─ Double inlining        (permissive revisit of callers)     │
//! │    ├─ Phase 2: Outlining     (support class, apply occurrences)  │
//! │    └─ Finalization           (synthesized classes, flags reset)  │
//! │                                                                  │
//! │  Per method:                                                     │
//! │    IrBuilder        raw code → SSA                               │
//! │    Pipeline         fixed order of PassKind rewrites             │
//! │      ├─ lens, member values, switch maps, inlining               │
//! │      ├─ normalize, CSE, arrays, move-results, constants, ifs     │
//! │      ├─ handler removal, dead code                               │
//! │      ├─ desugaring: twr, lambdas, interface statics              │
//! │      └─ outlining, live ranges, returns, argument logging        │
//! │    LinearScanAllocator  SSA → registers, moves resolved          │
//! │    peephole             goto collapsing, move/reload removal     │
//! │    CodeEncoder          register code → raw code                 │
//! │                                                                  │
//! │  EventLog               Change tracking and diagnostics          │
//! │  CfgPrinter             Optional code dumps                      │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod context;
mod converter;
pub mod desugar;
mod events;
pub mod inliner;
pub mod lowering;
pub mod outliner;
pub mod passes;
mod pipeline;
pub mod printer;
pub mod regalloc;

pub use config::{
    AttributeRemovalOptions, CompilerOptions, InliningOptions, OffOrAuto, OutlineOptions,
};
pub use context::{MethodSummary, OutlineMode, PassContext};
pub use converter::{ConversionOutput, Converter};
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use inliner::{DoubleInlining, Inliner};
pub use lowering::{CodeEncoder, RegisterEncoder};
pub use outliner::{OutlineSelection, OutlineShape, Outliner};
pub use pipeline::{PassKind, Pipeline};
pub use printer::{CfgPrinter, TextCfgPrinter};
pub use regalloc::{LinearScanAllocator, RegisterAllocation, RegisterCode};
