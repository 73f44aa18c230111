//! Methods and their per-compilation state.

use crate::program::{MethodId, RawCode, TypeName};

bitflags::bitflags! {
    /// Method access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// Accessible from everywhere
        const PUBLIC = 0x0001;
        /// Accessible only from the declaring class
        const PRIVATE = 0x0002;
        /// Accessible from the package and subclasses
        const PROTECTED = 0x0004;
        /// No receiver
        const STATIC = 0x0008;
        /// Cannot be overridden
        const FINAL = 0x0010;
        /// Holds the receiver's monitor for the duration of the call
        const SYNCHRONIZED = 0x0020;
        /// Compiler generated bridge
        const BRIDGE = 0x0040;
        /// Implemented outside the bytecode
        const NATIVE = 0x0100;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Instance or static initializer
        const CONSTRUCTOR = 0x10000;
    }
}

/// Where a method may be inlined.
///
/// The variants are ordered from most to least restrictive, so the constraint of a method that
/// touches several members is the minimum over those members.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumIter,
)]
pub enum InliningConstraint {
    /// Must never be inlined
    Never,
    /// May be inlined into methods of the same class only
    SameClass,
    /// May be inlined into methods of the same package only
    SamePackage,
    /// May be inlined anywhere
    Always,
}

impl InliningConstraint {
    /// Returns `true` if a method declared in `callee_holder` with this constraint may be inlined
    /// into a method declared in `caller_holder`.
    #[must_use]
    pub fn allows(self, callee_holder: &TypeName, caller_holder: &TypeName) -> bool {
        match self {
            InliningConstraint::Never => false,
            InliningConstraint::SameClass => callee_holder == caller_holder,
            InliningConstraint::SamePackage => callee_holder.package() == caller_holder.package(),
            InliningConstraint::Always => true,
        }
    }

    /// Combines two constraints, keeping the more restrictive one.
    #[must_use]
    pub fn meet(self, other: Self) -> Self {
        self.min(other)
    }
}

/// Processing state of a method within one compilation.
///
/// Every method goes `NotProcessed -> Processed` once per compile pass; re-optimization (double
/// inlining, outlining) resets it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessedState {
    /// Not yet optimized in the current pass
    #[default]
    NotProcessed,
    /// Optimized, with the resulting inlining constraint
    Processed(InliningConstraint),
}

/// Facts recorded about a method after it was optimized, consulted by its callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationInfo {
    /// Index of the argument the method always returns, receiver included
    pub returns_argument: Option<usize>,
    /// `true` if the method is small enough for the inliner
    pub is_simple: bool,
    /// Number of times the method was marked processed during the current compilation
    pub process_count: u32,
}

/// A method definition owned by a class.
#[derive(Debug, Clone)]
pub struct EncodedMethod {
    /// Identity
    pub id: MethodId,
    /// Access and property flags
    pub flags: MethodFlags,
    /// The body, `None` for abstract and native methods
    pub code: Option<RawCode>,
    state: ProcessedState,
    /// Facts from the last optimization
    pub info: OptimizationInfo,
}

impl EncodedMethod {
    /// Creates an unprocessed method.
    #[must_use]
    pub fn new(id: MethodId, flags: MethodFlags, code: Option<RawCode>) -> Self {
        Self {
            id,
            flags,
            code,
            state: ProcessedState::NotProcessed,
            info: OptimizationInfo::default(),
        }
    }

    /// Returns `true` if the method has no receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns `true` for private methods.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.flags.contains(MethodFlags::PRIVATE)
    }

    /// Returns `true` for public methods.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.flags.contains(MethodFlags::PUBLIC)
    }

    /// Returns `true` for methods that are neither public, protected nor private.
    #[must_use]
    pub fn is_package_private(&self) -> bool {
        !self
            .flags
            .intersects(MethodFlags::PUBLIC | MethodFlags::PROTECTED | MethodFlags::PRIVATE)
    }

    /// Returns `true` if the method must stay where it is (no IR can be built for it).
    #[must_use]
    pub fn is_abstract_or_native(&self) -> bool {
        self.flags
            .intersects(MethodFlags::ABSTRACT | MethodFlags::NATIVE)
    }

    /// Returns `true` for methods dispatched on a receiver.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_private() && !self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    /// Returns the current processing state.
    #[must_use]
    pub fn state(&self) -> ProcessedState {
        self.state
    }

    /// Returns `true` if the method was optimized in the current pass.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        matches!(self.state, ProcessedState::Processed(_))
    }

    /// Returns the inlining constraint, `None` while not processed.
    #[must_use]
    pub fn constraint(&self) -> Option<InliningConstraint> {
        match self.state {
            ProcessedState::Processed(constraint) => Some(constraint),
            ProcessedState::NotProcessed => None,
        }
    }

    /// Marks the method processed with `constraint`.
    pub fn mark_processed(&mut self, constraint: InliningConstraint) {
        self.state = ProcessedState::Processed(constraint);
        self.info.process_count += 1;
    }

    /// Resets the method so it can be optimized again.
    pub fn mark_not_processed(&mut self) {
        self.state = ProcessedState::NotProcessed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_ordering() {
        assert!(InliningConstraint::Never < InliningConstraint::SameClass);
        assert_eq!(
            InliningConstraint::Always.meet(InliningConstraint::SamePackage),
            InliningConstraint::SamePackage
        );
    }

    #[test]
    fn test_constraint_allows() {
        let a = TypeName::new("p.A");
        let b = TypeName::new("p.B");
        let c = TypeName::new("q.C");
        assert!(InliningConstraint::SameClass.allows(&a, &a));
        assert!(!InliningConstraint::SameClass.allows(&a, &b));
        assert!(InliningConstraint::SamePackage.allows(&a, &b));
        assert!(!InliningConstraint::SamePackage.allows(&a, &c));
        assert!(!InliningConstraint::Never.allows(&a, &a));
    }

    #[test]
    fn test_state_machine() {
        let id = MethodId::parse("p.A.m()void").unwrap();
        let mut method = EncodedMethod::new(id, MethodFlags::STATIC, None);
        assert!(!method.is_processed());
        method.mark_processed(InliningConstraint::Always);
        assert_eq!(method.constraint(), Some(InliningConstraint::Always));
        method.mark_not_processed();
        assert_eq!(method.state(), ProcessedState::NotProcessed);
        method.mark_processed(InliningConstraint::Never);
        assert_eq!(method.info.process_count, 2);
    }
}
