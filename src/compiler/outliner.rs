//! Outlining of repeated instruction sequences.
//!
//! Outlining runs in two phases of the converter:
//!
//! 1. **Identify.** While methods are optimized in phase 1, every window of consecutive
//!    outlinable instructions with a length in `[min_size, max_size]` is normalized into an
//!    [`OutlineShape`] and reported in the method summary. The converter feeds the summaries,
//!    batch by batch, into an [`Outliner`], which counts occurrences across the program.
//! 2. **Apply.** [`Outliner::select`] keeps the shapes seen at least `threshold` times, in first
//!    discovery order, and names one static method per shape on a synthesized support class.
//!    The methods that contained a selected shape are optimized again; this time matching
//!    windows are replaced by calls, longest shape first, without overlaps.
//!
//! # Shapes
//!
//! A shape abstracts from value numbers: operands are either inputs (`Input(i)`, values defined
//! before the window, numbered by first use) or temporaries (`Temp(j)`, the `j`-th value the
//! window defines). Constants keep their literal value. A window may let at most one of its
//! values escape; that value becomes the return value of the outline method.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, ValueId},
    compiler::{EventKind, OutlineMode, OutlineOptions, PassContext},
    program::{
        BinaryOp, ClassFlags, CodeAssembler, ConstValue, EncodedMethod, InvokeKind, MethodFlags,
        MethodId, NumericType, Program, ProgramClass, Proto, Reg, TypeName, UnaryOp, ValueType,
    },
    Result,
};

/// Operand of a shape instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
    /// The `i`-th value flowing into the window
    Input(u16),
    /// The `j`-th value defined inside the window
    Temp(u16),
}

/// A normalized instruction of a shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ShapeOp {
    Const {
        value: ConstValue,
    },
    Binary {
        op: BinaryOp,
        ty: NumericType,
        left: Operand,
        right: Operand,
    },
    Unary {
        op: UnaryOp,
        src: Operand,
    },
    Invoke {
        kind: InvokeKind,
        method: MethodId,
        args: Vec<Operand>,
        has_result: bool,
    },
}

impl ShapeOp {
    fn defines_value(&self) -> bool {
        !matches!(
            self,
            ShapeOp::Invoke {
                has_result: false,
                ..
            }
        )
    }
}

/// The normalized form of an outline candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutlineShape {
    /// Instructions in window order
    pub ops: Vec<ShapeOp>,
    /// Parameter types of the outline method, one per input
    pub input_types: Vec<TypeName>,
    /// The escaping temporary and its type
    pub returns: Option<(Operand, TypeName)>,
}

impl OutlineShape {
    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` for a shape without instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the prototype of the outline method.
    #[must_use]
    pub fn proto(&self) -> Proto {
        let return_type = self
            .returns
            .as_ref()
            .map_or_else(TypeName::void, |(_, ty)| ty.clone());
        Proto::new(return_type, self.input_types.clone())
    }

    /// Assembles the body of the outline method: inputs in the first registers, one register
    /// per temporary after them.
    fn assemble(&self) -> Result<crate::program::RawCode> {
        let ins = self.input_types.len() as Reg;
        let temps = self.ops.iter().filter(|op| op.defines_value()).count() as Reg;
        let register = |operand: Operand| match operand {
            Operand::Input(i) => i,
            Operand::Temp(j) => ins + j,
        };
        let mut asm = CodeAssembler::new(ins + temps.max(1), ins);
        let mut next_temp = ins;
        for op in &self.ops {
            match op {
                ShapeOp::Const { value } => {
                    asm.const_value(next_temp, value.clone());
                }
                ShapeOp::Binary {
                    op,
                    ty,
                    left,
                    right,
                } => {
                    asm.binary(*op, *ty, next_temp, register(*left), register(*right));
                }
                ShapeOp::Unary { op, src } => {
                    asm.unary(*op, next_temp, register(*src));
                }
                ShapeOp::Invoke {
                    kind,
                    method,
                    args,
                    has_result,
                } => {
                    let args: Vec<Reg> = args.iter().map(|&a| register(a)).collect();
                    asm.invoke(*kind, method.clone(), &args);
                    if *has_result {
                        asm.move_result(next_temp);
                    }
                }
            }
            if op.defines_value() {
                next_temp += 1;
            }
        }
        match &self.returns {
            Some((operand, _)) => asm.return_value(register(*operand)),
            None => asm.return_void(),
        };
        asm.finish()
    }
}

impl fmt::Display for OutlineShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.proto(), self.ops.len())
    }
}

/// A window of a method that normalizes to a shape.
#[derive(Debug, Clone)]
struct Window {
    block: BlockId,
    start: usize,
    end: usize,
    shape: OutlineShape,
    inputs: Vec<ValueId>,
    escaping: Option<ValueId>,
}

fn is_accessible_target(program: &Program, method: &MethodId, options: &OutlineOptions) -> bool {
    if method.holder.as_str().starts_with(options.class_name.as_str()) {
        return false;
    }
    match program.definition_for(&method.holder) {
        None => true,
        Some(class) => {
            class.flags.contains(ClassFlags::PUBLIC)
                && program
                    .lookup_method(method)
                    .is_some_and(EncodedMethod::is_public)
        }
    }
}

fn is_outlinable(op: &IrOp, program: &Program, options: &OutlineOptions) -> bool {
    match op {
        IrOp::Const { value, .. } => !matches!(value, ConstValue::Type(_)),
        IrOp::Binary { .. } | IrOp::Unary { .. } => true,
        IrOp::Invoke { kind, method, .. } => {
            matches!(kind, InvokeKind::Static | InvokeKind::Virtual)
                && is_accessible_target(program, method, options)
        }
        _ => false,
    }
}

/// Type of an input read at operand `position` of `op`.
fn input_type(code: &IrCode, op: &IrOp, position: usize, value: ValueId) -> TypeName {
    let ty = code.value_type(value);
    if ty != ValueType::Reference {
        return ty.type_name();
    }
    match op {
        IrOp::Invoke { kind, method, .. } => {
            if kind.has_receiver() {
                match position.checked_sub(1) {
                    None => method.holder.clone(),
                    Some(p) => method.proto.parameters[p].clone(),
                }
            } else {
                method.proto.parameters[position].clone()
            }
        }
        _ => TypeName::object(),
    }
}

fn result_type(code: &IrCode, op: &IrOp, value: ValueId) -> TypeName {
    match op {
        IrOp::Invoke { method, .. } => method.proto.return_type.clone(),
        IrOp::Const {
            value: ConstValue::String(_),
            ..
        } => TypeName::string(),
        _ => code.value_type(value).type_name(),
    }
}

/// Normalizes instructions `start..end` of `block`, `None` if the window does not qualify.
fn build_window(
    code: &IrCode,
    block: BlockId,
    start: usize,
    end: usize,
    use_counts: &[usize],
) -> Option<Window> {
    let ops = &code.block(block).instructions[start..end];
    if ops.iter().all(|op| matches!(op, IrOp::Const { .. })) {
        return None;
    }

    let mut temps: HashMap<ValueId, (Operand, TypeName)> = HashMap::new();
    let mut inputs: Vec<ValueId> = Vec::new();
    let mut input_types: Vec<TypeName> = Vec::new();
    let mut local_uses: HashMap<ValueId, usize> = HashMap::new();
    let mut shape_ops = Vec::with_capacity(ops.len());
    let mut next_temp = 0u16;

    for op in ops {
        let mut operand = |position: usize, value: ValueId| -> Operand {
            *local_uses.entry(value).or_default() += 1;
            if let Some((operand, _)) = temps.get(&value) {
                return *operand;
            }
            let index = match inputs.iter().position(|&v| v == value) {
                Some(index) => index,
                None => {
                    inputs.push(value);
                    input_types.push(input_type(code, op, position, value));
                    inputs.len() - 1
                }
            };
            Operand::Input(index as u16)
        };
        let shape_op = match op {
            IrOp::Const { value, .. } => ShapeOp::Const {
                value: value.clone(),
            },
            IrOp::Binary {
                op,
                ty,
                left,
                right,
                ..
            } => ShapeOp::Binary {
                op: *op,
                ty: *ty,
                left: operand(0, *left),
                right: operand(1, *right),
            },
            IrOp::Unary { op, src, .. } => ShapeOp::Unary {
                op: *op,
                src: operand(0, *src),
            },
            IrOp::Invoke {
                kind,
                method,
                args,
                dest,
            } => ShapeOp::Invoke {
                kind: *kind,
                method: method.clone(),
                args: args
                    .iter()
                    .enumerate()
                    .map(|(position, &arg)| operand(position, arg))
                    .collect(),
                has_result: dest.is_some(),
            },
            _ => return None,
        };
        if let Some(dest) = op.dest() {
            temps.insert(dest, (Operand::Temp(next_temp), result_type(code, op, dest)));
            next_temp += 1;
        }
        shape_ops.push(shape_op);
    }

    let mut escaping = temps
        .iter()
        .filter(|(value, _)| {
            use_counts[value.index()] > local_uses.get(*value).copied().unwrap_or(0)
        });
    let returned = escaping.next();
    if escaping.next().is_some() {
        return None;
    }
    let escaping = returned.map(|(&value, _)| value);
    let returns = returned.map(|(_, (operand, ty))| (*operand, ty.clone()));

    Some(Window {
        block,
        start,
        end,
        shape: OutlineShape {
            ops: shape_ops,
            input_types,
            returns,
        },
        inputs,
        escaping,
    })
}

/// Enumerates the qualifying windows of `code` in block and position order.
fn find_windows(code: &IrCode, program: &Program, options: &OutlineOptions) -> Vec<Window> {
    let use_counts = code.use_counts();
    let mut windows = Vec::new();
    for block in code.block_ids() {
        let current = code.block(block);
        if !current.catch_handlers.is_empty() {
            continue;
        }
        let len = current.instructions.len();
        let mut run_start = 0;
        for i in 0..=len {
            if i < len && is_outlinable(&current.instructions[i], program, options) {
                continue;
            }
            for start in run_start..i {
                let longest = i.min(start + options.max_size);
                for end in (start + options.min_size)..=longest {
                    if let Some(window) = build_window(code, block, start, end, &use_counts) {
                        windows.push(window);
                    }
                }
            }
            run_start = i + 1;
        }
    }
    windows
}

fn identify(code: &IrCode, ctx: &mut PassContext<'_>) {
    let windows = find_windows(code, ctx.program, &ctx.options.outline);
    if windows.is_empty() {
        return;
    }
    ctx.events
        .record(EventKind::OutlineCandidateFound)
        .method(ctx.method.id.clone())
        .message(format!("{} candidate windows", windows.len()))
        .pass("outlining");
    ctx.summary
        .outline_candidates
        .extend(windows.into_iter().map(|w| w.shape));
}

fn apply(code: &mut IrCode, ctx: &mut PassContext<'_>, selection: &OutlineSelection) -> bool {
    let mut windows: Vec<(Window, MethodId)> = find_windows(code, ctx.program, &ctx.options.outline)
        .into_iter()
        .filter_map(|w| {
            let method = selection.method_for(&w.shape)?.clone();
            Some((w, method))
        })
        .collect();
    windows.sort_by(|(a, _), (b, _)| {
        (b.end - b.start)
            .cmp(&(a.end - a.start))
            .then(a.block.cmp(&b.block))
            .then(a.start.cmp(&b.start))
    });

    let mut taken: HashMap<BlockId, Vec<(usize, usize)>> = HashMap::new();
    let mut chosen = Vec::new();
    for (window, method) in windows {
        let ranges = taken.entry(window.block).or_default();
        if ranges
            .iter()
            .any(|&(s, e)| window.start < e && s < window.end)
        {
            continue;
        }
        ranges.push((window.start, window.end));
        chosen.push((window, method));
    }

    // later windows first so earlier indices stay valid
    chosen.sort_by(|(a, _), (b, _)| b.block.cmp(&a.block).then(b.start.cmp(&a.start)));
    let count = chosen.len();
    for (window, method) in chosen {
        let call = IrOp::Invoke {
            kind: InvokeKind::Static,
            method: method.clone(),
            args: window.inputs,
            dest: window.escaping,
        };
        code.block_mut(window.block)
            .instructions
            .splice(window.start..window.end, std::iter::once(call));
        ctx.events
            .record(EventKind::SequenceOutlined)
            .at(ctx.method.id.clone(), window.start)
            .message(format!("{method}"))
            .pass("outlining");
    }
    ctx.summary.outlined += count;
    count > 0
}

/// Collects candidates or replaces selected sequences, depending on the outline mode.
///
/// # Errors
///
/// Never fails; the signature matches the other passes.
pub fn run(code: &mut IrCode, ctx: &mut PassContext<'_>) -> Result<bool> {
    match ctx.outline {
        OutlineMode::Disabled => Ok(false),
        OutlineMode::Identify => {
            identify(code, ctx);
            Ok(false)
        }
        OutlineMode::Apply(selection) => Ok(apply(code, ctx, selection)),
    }
}

/// Program-wide occurrence counts of outline shapes.
#[derive(Debug, Clone, Default)]
pub struct Outliner {
    counts: HashMap<OutlineShape, usize>,
    discovery: Vec<OutlineShape>,
    methods: Vec<(MethodId, HashSet<OutlineShape>)>,
}

impl Outliner {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the candidates found in `method`. Must be called in a deterministic order.
    pub fn record(&mut self, method: &MethodId, shapes: Vec<OutlineShape>) {
        if shapes.is_empty() {
            return;
        }
        let mut distinct = HashSet::new();
        for shape in shapes {
            let count = self.counts.entry(shape.clone()).or_insert(0);
            if *count == 0 {
                self.discovery.push(shape.clone());
            }
            *count += 1;
            distinct.insert(shape);
        }
        self.methods.push((method.clone(), distinct));
    }

    /// Returns the number of distinct shapes seen.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.discovery.len()
    }

    /// Returns how often `shape` was seen.
    #[must_use]
    pub fn count(&self, shape: &OutlineShape) -> usize {
        self.counts.get(shape).copied().unwrap_or(0)
    }

    /// Selects the shapes seen at least `threshold` times and names their outline methods.
    ///
    /// The class is named after `options.class_name`, with a numeric suffix if the program
    /// already defines a class of that name.
    #[must_use]
    pub fn select(&self, program: &Program, options: &OutlineOptions) -> OutlineSelection {
        let class = program.fresh_type_name(&options.class_name);
        let mut methods = Vec::new();
        let mut index = HashMap::new();
        for shape in &self.discovery {
            let len = shape.len();
            if self.count(shape) < options.threshold
                || len < options.min_size
                || len > options.max_size
            {
                continue;
            }
            let id = MethodId::new(
                class.clone(),
                format!("{}{}", options.method_prefix, methods.len()),
                shape.proto(),
            );
            index.insert(shape.clone(), methods.len());
            methods.push((shape.clone(), id));
        }
        let reprocess = self
            .methods
            .iter()
            .filter(|(_, shapes)| shapes.iter().any(|s| index.contains_key(s)))
            .map(|(method, _)| method.clone())
            .collect();
        OutlineSelection {
            class,
            methods,
            index,
            reprocess,
        }
    }
}

/// The shapes chosen for outlining and their synthesized methods.
#[derive(Debug, Clone)]
pub struct OutlineSelection {
    class: TypeName,
    methods: Vec<(OutlineShape, MethodId)>,
    index: HashMap<OutlineShape, usize>,
    reprocess: Vec<MethodId>,
}

impl OutlineSelection {
    /// Returns `true` if nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Returns the number of outline methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns the support class type.
    #[must_use]
    pub fn class_type(&self) -> &TypeName {
        &self.class
    }

    /// Returns the outline method for `shape`.
    #[must_use]
    pub fn method_for(&self, shape: &OutlineShape) -> Option<&MethodId> {
        self.index.get(shape).map(|&i| &self.methods[i].1)
    }

    /// Returns the outline methods in index order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodId> {
        self.methods.iter().map(|(_, id)| id)
    }

    /// Returns the methods that contained a selected shape, in discovery order.
    #[must_use]
    pub fn methods_to_reprocess(&self) -> &[MethodId] {
        &self.reprocess
    }

    /// Synthesizes the support class with one public static method per shape.
    ///
    /// # Errors
    ///
    /// Returns an error if a shape body cannot be assembled.
    pub fn build_class(&self) -> Result<ProgramClass> {
        let mut class = ProgramClass::new(
            self.class.clone(),
            ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SYNTHETIC,
        );
        for (shape, id) in &self.methods {
            class.add_method(EncodedMethod::new(
                id.clone(),
                MethodFlags::PUBLIC | MethodFlags::STATIC | MethodFlags::SYNTHETIC,
                Some(shape.assemble()?),
            ));
        }
        Ok(class)
    }
}
