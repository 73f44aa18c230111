//! Call site representation and call target types.

use crate::program::{InvokeKind, MethodId};

/// Resolved target of an invoke instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Resolved to a single method defined by the program.
    Resolved(MethodId),

    /// Virtual or interface call with several program targets from class hierarchy analysis.
    Virtual {
        /// The method named by the instruction, after lens rewriting.
        declared: MethodId,
        /// All program methods that may run, in program order.
        possible_targets: Vec<MethodId>,
    },

    /// Call to a method the program does not define (library code).
    External(MethodId),
}

impl CallTarget {
    /// Returns `true` if at least one program method may run.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Virtual { .. })
    }

    /// Returns every program method that may run.
    #[must_use]
    pub fn all_targets(&self) -> Vec<MethodId> {
        match self {
            Self::Resolved(method) => vec![method.clone()],
            Self::Virtual {
                possible_targets, ..
            } => possible_targets.clone(),
            Self::External(_) => Vec::new(),
        }
    }
}

/// A single invoke instruction within a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Index of the invoke in the raw instruction list.
    pub offset: usize,
    /// The invoke kind.
    pub kind: InvokeKind,
    /// The resolved target.
    pub target: CallTarget,
}

impl CallSite {
    /// Creates a call site.
    #[must_use]
    pub const fn new(offset: usize, kind: InvokeKind, target: CallTarget) -> Self {
        Self {
            offset,
            kind,
            target,
        }
    }

    /// Returns `true` if more than one program method may run.
    #[must_use]
    pub fn is_polymorphic(&self) -> bool {
        matches!(
            &self.target,
            CallTarget::Virtual {
                possible_targets, ..
            } if possible_targets.len() > 1
        )
    }
}
