//! Change journal of a compilation.
//!
//! Passes record what they changed as [`Event`]s in an [`EventLog`]. The log is append-only
//! and lock-free ([`boxcar::Vec`]), so methods optimized in parallel record into the same log
//! without coordination. Events can be inspected by tests and tools or safely ignored.
//!
//! # Example
//!
//! ```rust
//! use dexopt::compiler::{EventKind, EventLog};
//! use dexopt::program::MethodId;
//!
//! let log = EventLog::new();
//! let method = MethodId::parse("p.A.run()void").unwrap();
//!
//! log.record(EventKind::ConstantFolded)
//!     .at(method.clone(), 3)
//!     .message("add-int v1, v2 -> 5");
//! log.info("phase 1 done");
//!
//! assert_eq!(log.count_kind(EventKind::ConstantFolded), 1);
//! assert_eq!(log.filter_method(&method).count(), 1);
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::program::MethodId;

/// Categories of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A call target was rewritten through the graph lens.
    CallRetargeted,
    /// A read of a constant static field was replaced by its value.
    FieldValuePropagated,
    /// A switch over an enum switch map was rewritten to switch on the ordinal.
    SwitchMapRemoved,
    /// A call was replaced by the callee's body.
    MethodInlined,
    /// A redundant computation was replaced by an earlier equal one.
    SubexpressionEliminated,
    /// An array filled element by element became a filled-new-array.
    ArrayConstructed,
    /// A constant was folded or propagated.
    ConstantFolded,
    /// A conditional branch or switch was simplified.
    BranchSimplified,
    /// A catch handler that cannot be reached was removed.
    HandlerRemoved,
    /// An instruction was removed.
    InstructionRemoved,
    /// A basic block was removed.
    BlockRemoved,
    /// An invoke-custom was replaced by a lambda class factory call.
    LambdaDesugared,
    /// A static interface call was moved to the companion class.
    InterfaceCallRetargeted,
    /// An `addSuppressed` call was replaced by the backport.
    SuppressedCallRewritten,
    /// An instruction sequence was replaced by a call to an outline method.
    SequenceOutlined,
    /// A definition was moved closer to its uses.
    LiveRangeShortened,
    /// Argument logging was inserted.
    ArgumentsLogged,
    /// A live interval was split under register pressure.
    IntervalSplit,
    /// A redundant move or constant reload was removed after allocation.
    PeepholeApplied,

    /// A method was found to always return one of its arguments.
    ReturnsArgumentIdentified,
    /// An instruction sequence was counted as an outlining candidate.
    OutlineCandidateFound,
    /// A caller was queued for the double inlining pass.
    DoubleInlineRequested,
    /// Call graph edges were removed to break a cycle.
    CycleBroken,

    /// A leaf batch started.
    BatchStarted,
    /// A method finished the pipeline and was marked processed.
    MethodProcessed,
    /// Code was regenerated from the IR.
    CodeRegenerated,
    /// A class was synthesized.
    ClassSynthesized,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::CallRetargeted => "call retargeted",
            Self::FieldValuePropagated => "field value propagated",
            Self::SwitchMapRemoved => "switch map removed",
            Self::MethodInlined => "method inlined",
            Self::SubexpressionEliminated => "subexpression eliminated",
            Self::ArrayConstructed => "array constructed",
            Self::ConstantFolded => "constant folded",
            Self::BranchSimplified => "branch simplified",
            Self::HandlerRemoved => "handler removed",
            Self::InstructionRemoved => "instruction removed",
            Self::BlockRemoved => "block removed",
            Self::LambdaDesugared => "lambda desugared",
            Self::InterfaceCallRetargeted => "interface call retargeted",
            Self::SuppressedCallRewritten => "suppressed call rewritten",
            Self::SequenceOutlined => "sequence outlined",
            Self::LiveRangeShortened => "live range shortened",
            Self::ArgumentsLogged => "arguments logged",
            Self::IntervalSplit => "interval split",
            Self::PeepholeApplied => "peephole applied",
            // Analysis
            Self::ReturnsArgumentIdentified => "returns argument identified",
            Self::OutlineCandidateFound => "outline candidate found",
            Self::DoubleInlineRequested => "double inline requested",
            Self::CycleBroken => "cycle broken",
            // Engine
            Self::BatchStarted => "batch started",
            Self::MethodProcessed => "method processed",
            Self::CodeRegenerated => "code regenerated",
            Self::ClassSynthesized => "class synthesized",
            // Diagnostic
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::CallRetargeted
                | Self::FieldValuePropagated
                | Self::SwitchMapRemoved
                | Self::MethodInlined
                | Self::SubexpressionEliminated
                | Self::ArrayConstructed
                | Self::ConstantFolded
                | Self::BranchSimplified
                | Self::HandlerRemoved
                | Self::InstructionRemoved
                | Self::BlockRemoved
                | Self::LambdaDesugared
                | Self::InterfaceCallRetargeted
                | Self::SuppressedCallRewritten
                | Self::SequenceOutlined
                | Self::LiveRangeShortened
                | Self::ArgumentsLogged
                | Self::IntervalSplit
                | Self::PeepholeApplied
        )
    }

    /// Returns true if this is a diagnostic event (info/warning/error).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// The method concerned, if any
    pub method: Option<MethodId>,
    /// Position within the method (block index or instruction index), if meaningful
    pub location: Option<usize>,
    /// Free-form details
    pub message: String,
    /// The pass that recorded the event
    pub pass: Option<&'static str>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind)?;
        if let Some(method) = &self.method {
            write!(f, "{method}: ")?;
        }
        f.write_str(&self.message)
    }
}

/// Fluent builder returned by [`EventLog::record`]; the event is pushed when it is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodId>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<&'static str>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets method and location.
    pub fn at(mut self, method: MethodId, location: usize) -> Self {
        self.method = Some(method);
        self.location = Some(location);
        self
    }

    /// Sets the method.
    pub fn method(mut self, method: MethodId) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the location.
    pub fn location(mut self, location: usize) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the message; defaults to the kind's description.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Sets the recording pass.
    pub fn pass(mut self, pass_name: &'static str) -> Self {
        self.pass = Some(pass_name);
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Append-only, thread-safe collection of events.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts recording an event of `kind`.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of all events of `other`, in order.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns `true` if an event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts the events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Iterates all events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Iterates the events of `kind`.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Iterates the events concerning `method`.
    pub fn filter_method<'a>(&'a self, method: &'a MethodId) -> impl Iterator<Item = &'a Event> {
        self.iter().filter(move |e| e.method.as_ref() == Some(method))
    }

    /// Iterates the transformation events.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Iterates the warnings.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Counts events per kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of distinct methods with a transformation event.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.transformations()
            .filter_map(|e| e.method.as_ref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Returns a one-line summary of the transformation counts.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl Extend<Event> for EventLog {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        for event in iter {
            self.events.push(event);
        }
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

/// Aggregate numbers derived from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Distinct methods with at least one transformation
    pub methods_transformed: usize,
    /// Calls replaced by callee bodies
    pub methods_inlined: usize,
    /// Sequences replaced by outline calls
    pub sequences_outlined: usize,
    /// Constants folded
    pub constants_folded: usize,
    /// Instructions removed
    pub instructions_removed: usize,
    /// Blocks removed
    pub blocks_removed: usize,
    /// Branches simplified
    pub branches_simplified: usize,
    /// Methods whose code was regenerated
    pub methods_regenerated: usize,
    /// Classes synthesized
    pub classes_synthesized: usize,
    /// Call graph cycles broken
    pub cycles_broken: usize,
    /// Warnings
    pub warnings: usize,
    /// Wall-clock time of the compilation
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes the statistics of `log`.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            methods_transformed: log.methods_affected(),
            methods_inlined: get(EventKind::MethodInlined),
            sequences_outlined: get(EventKind::SequenceOutlined),
            constants_folded: get(EventKind::ConstantFolded),
            instructions_removed: get(EventKind::InstructionRemoved),
            blocks_removed: get(EventKind::BlockRemoved),
            branches_simplified: get(EventKind::BranchSimplified),
            methods_regenerated: get(EventKind::CodeRegenerated),
            classes_synthesized: get(EventKind::ClassSynthesized),
            cycles_broken: get(EventKind::CycleBroken),
            warnings: get(EventKind::Warning),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the elapsed time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Returns a human readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.methods_transformed > 0 {
            parts.push(format!("{} methods", self.methods_transformed));
        }
        if self.methods_inlined > 0 {
            parts.push(format!("{} inlined", self.methods_inlined));
        }
        if self.sequences_outlined > 0 {
            parts.push(format!("{} outlined", self.sequences_outlined));
        }
        if self.constants_folded > 0 {
            parts.push(format!("{} constants", self.constants_folded));
        }
        if self.instructions_removed > 0 {
            parts.push(format!("{} instructions removed", self.instructions_removed));
        }
        if self.cycles_broken > 0 {
            parts.push(format!("{} cycles broken", self.cycles_broken));
        }
        if parts.is_empty() {
            return "no changes".to_string();
        }
        if !self.total_time.is_zero() {
            parts.push(format!("{:.2?}", self.total_time));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method() -> MethodId {
        MethodId::parse("p.A.run()void").unwrap()
    }

    #[test]
    fn test_builder_pushes_on_drop() {
        let log = EventLog::new();
        log.record(EventKind::MethodInlined)
            .at(method(), 2)
            .pass("inlining");
        let event = log.iter().next().unwrap();
        assert_eq!(event.message, "method inlined");
        assert_eq!(event.location, Some(2));
        assert_eq!(event.pass, Some("inlining"));
    }

    #[test]
    fn test_each_setter_ends_a_statement() {
        let log = EventLog::new();
        log.record(EventKind::ConstantFolded).method(method());
        log.record(EventKind::ConstantFolded).location(4);
        log.record(EventKind::BlockRemoved).message("b3");
        log.record(EventKind::BlockRemoved).pass("dead-code");
        log.record(EventKind::MethodInlined).at(method(), 1);
        assert_eq!(log.len(), 5);
        assert_eq!(log.count_kind(EventKind::ConstantFolded), 2);
        assert_eq!(log.count_kind(EventKind::BlockRemoved), 2);
        assert!(log.iter().any(|e| e.message == "b3"));
    }

    #[test]
    fn test_summary_counts_transformations_only() {
        let log = EventLog::new();
        log.info("started");
        assert_eq!(log.summary(), "1 events");
        log.record(EventKind::ConstantFolded).method(method());
        log.record(EventKind::ConstantFolded).method(method());
        log.record(EventKind::BlockRemoved).method(method());
        assert_eq!(log.summary(), "1 block removed, 2 constant folded");
        assert_eq!(log.methods_affected(), 1);
    }

    #[test]
    fn test_derived_stats() {
        let log: EventLog = vec![
            Event::new(EventKind::MethodInlined, "x"),
            Event::new(EventKind::CycleBroken, "y"),
        ]
        .into_iter()
        .collect();
        let stats = DerivedStats::from_log(&log);
        assert_eq!(stats.methods_inlined, 1);
        assert_eq!(stats.cycles_broken, 1);
        assert!(stats.summary().contains("1 inlined"));
    }
}
