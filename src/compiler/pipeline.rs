//! The fixed per-method pass order.
//!
//! [`PassKind`] names every IR rewrite the compiler runs on a method, in the order they run.
//! A [`Pipeline`] is a plain list of pass kinds: [`Pipeline::standard`] for optimization,
//! [`Pipeline::conversion`] for the non-optimizing conversion. Each pass decides from the
//! [`PassContext`] whether it applies to the current method and compilation phase.
//!
//! When [`crate::CompilerOptions::verify_ssa`] is set, the SSA invariants are checked after
//! every pass that ran; a violation names the offending pass and aborts the method.

use crate::{
    analysis::IrCode,
    compiler::{
        desugar, inliner,
        outliner,
        passes::{
            arrays, conditionals, constants, cse, deadcode, handlers, lens, liveranges, logging,
            members, moveresult, normalize, returns, switchmap,
        },
        OutlineMode, PassContext,
    },
    Error, Result,
};

/// One step of the optimization pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum PassKind {
    /// Rewrites member references through the graph lens
    LensRewrite,
    /// Replaces reads of constant static fields by their value
    MemberValuePropagation,
    /// Switches on enum ordinals instead of switch map lookups
    SwitchMapRemoval,
    /// Replaces calls to simple methods by their bodies
    Inlining,
    /// `Long.compare` and `requireNonNull` rewriting
    LongCompareNormalization,
    /// Common subexpression elimination
    Cse,
    /// `new-array` plus constant stores to `filled-new-array`
    ArrayConstruction,
    /// Uses the argument a callee is known to return
    MoveResultFolding,
    /// Gives every constant use in another block its own definition
    ConstantSplitting,
    /// Constant folding and branch folding
    ConstantFolding,
    /// Branch simplification
    ConditionalSimplification,
    /// Removes catch handlers that cannot be reached
    CatchHandlerRemoval,
    /// Dead code removal to a fixed point
    DeadCodeElimination,
    /// Routes `addSuppressed` through the backport
    TryWithResourcesDesugaring,
    /// Replaces `invoke-custom` by lambda class factories
    LambdaDesugaring,
    /// Routes static interface calls to companion classes
    InterfaceMethodDesugaring,
    /// Identifies or applies outline candidates
    Outlining,
    /// Moves constants next to their uses
    LiveRangeShortening,
    /// Detects methods returning one of their arguments
    ReturnsArgument,
    /// Prints the arguments on entry
    ArgumentLogging,
}

impl PassKind {
    /// Returns `true` if the pass applies in `ctx`.
    #[must_use]
    pub fn is_enabled(self, ctx: &PassContext<'_>) -> bool {
        let options = ctx.options;
        match self {
            PassKind::LensRewrite => !ctx.lens.is_identity(),
            PassKind::MemberValuePropagation => ctx.propagate_member_values,
            PassKind::SwitchMapRemoval => options.remove_switch_maps,
            PassKind::Inlining => options.inline_accessors && ctx.inliner.is_some(),
            PassKind::TryWithResourcesDesugaring => options.enable_try_with_resources_desugaring(),
            PassKind::LambdaDesugaring => ctx.lambdas.is_some(),
            PassKind::InterfaceMethodDesugaring => options.enable_interface_method_desugaring(),
            PassKind::Outlining => !matches!(ctx.outline, OutlineMode::Disabled),
            PassKind::ArgumentLogging => !options.log_arguments_filter.is_empty(),
            _ => true,
        }
    }

    /// Runs the pass, returning whether it changed the code.
    ///
    /// # Errors
    ///
    /// Propagates the errors of the pass.
    pub fn run(self, code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
        match self {
            PassKind::LensRewrite => lens::run(code, ctx),
            PassKind::MemberValuePropagation => members::run(code, ctx),
            PassKind::SwitchMapRemoval => switchmap::run(code, ctx),
            PassKind::Inlining => inliner::run(code, ctx),
            PassKind::LongCompareNormalization => normalize::run(code, ctx),
            PassKind::Cse => cse::run(code, ctx),
            PassKind::ArrayConstruction => arrays::run(code, ctx),
            PassKind::MoveResultFolding => moveresult::run(code, ctx),
            PassKind::ConstantSplitting => constants::split(code, ctx),
            PassKind::ConstantFolding => constants::fold(code, ctx),
            PassKind::ConditionalSimplification => conditionals::run(code, ctx),
            PassKind::CatchHandlerRemoval => handlers::run(code, ctx),
            PassKind::DeadCodeElimination => deadcode::run(code, ctx),
            PassKind::TryWithResourcesDesugaring => desugar::twr::run(code, ctx),
            PassKind::LambdaDesugaring => desugar::lambda::run(code, ctx),
            PassKind::InterfaceMethodDesugaring => desugar::interfaces::run(code, ctx),
            PassKind::Outlining => outliner::run(code, ctx),
            PassKind::LiveRangeShortening => liveranges::run(code, ctx),
            PassKind::ReturnsArgument => returns::run(code, ctx),
            PassKind::ArgumentLogging => logging::run(code, ctx),
        }
    }
}

/// An ordered list of passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    passes: Vec<PassKind>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl Pipeline {
    /// The optimization pipeline: every pass in declaration order.
    #[must_use]
    pub fn standard() -> Self {
        use strum::IntoEnumIterator;
        Self {
            passes: PassKind::iter().collect(),
        }
    }

    /// The conversion pipeline: rewrites the program needs to stay valid, no optimization.
    #[must_use]
    pub fn conversion() -> Self {
        Self {
            passes: vec![
                PassKind::LensRewrite,
                PassKind::DeadCodeElimination,
                PassKind::TryWithResourcesDesugaring,
                PassKind::LambdaDesugaring,
                PassKind::InterfaceMethodDesugaring,
                PassKind::ArgumentLogging,
            ],
        }
    }

    /// Creates a pipeline from an explicit pass list.
    #[must_use]
    pub fn from_passes(passes: Vec<PassKind>) -> Self {
        Self { passes }
    }

    /// Returns the passes in run order.
    #[must_use]
    pub fn passes(&self) -> &[PassKind] {
        &self.passes
    }

    /// Runs every enabled pass. Returns `true` if any pass changed the code.
    ///
    /// # Errors
    ///
    /// Returns the first pass error, or [`Error::InvariantViolation`] naming the pass after
    /// which the SSA invariants no longer hold.
    pub fn run(&self, code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
        self.run_with(code, ctx, |_, _, _| {})
    }

    /// Like [`Pipeline::run`], calling `after_pass(pass, code, changed)` after every pass that
    /// ran.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run`].
    pub fn run_with<F>(
        &self,
        code: &mut IrCode,
        ctx: &mut PassContext<'_>,
        mut after_pass: F,
    ) -> Result<bool>
    where
        F: FnMut(PassKind, &IrCode, bool),
    {
        let mut changed = false;
        for &pass in &self.passes {
            if !pass.is_enabled(ctx) {
                continue;
            }
            let pass_changed = pass.run(code, ctx)?;
            if ctx.options.verify_ssa {
                if let Err(error) = code.verify_ssa() {
                    return Err(match error {
                        Error::InvariantViolation {
                            message,
                            file,
                            line,
                        } => Error::InvariantViolation {
                            message: format!("after {pass}: {message}"),
                            file,
                            line,
                        },
                        other => other,
                    });
                }
            }
            if pass_changed {
                log::trace!("{}: {pass} changed the code", code.method());
            }
            after_pass(pass, code, pass_changed);
            changed |= pass_changed;
        }
        Ok(changed)
    }
}
