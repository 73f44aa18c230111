//! SSA construction from raw register code.
//!
//! [`RegisterIrBuilder`] follows Braun et al., "Simple and Efficient Construction of Static
//! Single Assignment Form": the control flow graph is computed up front, blocks are filled in
//! reverse postorder, and registers are resolved to values on demand by walking predecessors,
//! creating phis where paths join. A block is sealed once all its predecessors are filled;
//! phis created before that are completed at sealing time. Trivial phis are removed in one
//! global pass at the end.
//!
//! # Exceptional edges
//!
//! Inside a try range every throwing instruction ends its block (an invoke and its
//! `move-result` stay together). The block's catch handlers then observe the registers as they
//! were *before* the throwing instruction, so the builder keeps a snapshot of the block's
//! definitions at that point and serves exceptional reads from it.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::ir::{BlockId, CatchHandler, IrCode, IrOp, Phi, ValueId},
    program::{
        ConstValue, EncodedMethod, RawCode, RawInstruction, Reg, TypeName, UnaryOp, ValueType,
    },
    utils::graph::{reverse_postorder, NodeId, Successors},
    Result,
};

/// Lifts the raw code of a method into SSA form.
pub trait IrBuilder: Send + Sync {
    /// Builds the IR of `method`.
    ///
    /// Returns `Ok(None)` for methods that cannot be represented as IR (no code, abstract or
    /// native); the caller skips those.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the raw code is inconsistent, e.g. it reads a
    /// register that is not defined on every path.
    fn build_ir(&self, method: &EncodedMethod) -> Result<Option<IrCode>>;
}

/// The default [`IrBuilder`] for [`RawCode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterIrBuilder;

impl IrBuilder for RegisterIrBuilder {
    fn build_ir(&self, method: &EncodedMethod) -> Result<Option<IrCode>> {
        if method.is_abstract_or_native() {
            return Ok(None);
        }
        let Some(raw) = &method.code else {
            return Ok(None);
        };
        let construction = SsaConstruction::new(method, raw)?;
        construction.run().map(Some)
    }
}

struct BlockSuccessors(Vec<Vec<BlockId>>);

impl Successors for BlockSuccessors {
    fn node_count(&self) -> usize {
        self.0.len()
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.0[node.index()].iter().map(|b| NodeId::new(b.index()))
    }
}

struct SsaConstruction<'a> {
    method: &'a EncodedMethod,
    raw: &'a RawCode,
    code: IrCode,
    registers: usize,
    /// Raw instruction range per IR block, empty for the entry
    ranges: Vec<(usize, usize)>,
    /// Leader instruction index to IR block
    block_at: HashMap<usize, BlockId>,
    /// Normal successors then catch targets, per IR block
    successors: Vec<Vec<BlockId>>,
    exceptional: HashSet<(BlockId, BlockId)>,
    /// Index of the instruction whose exception reaches the handlers
    throwing: Vec<Option<usize>>,
    local: Vec<Vec<Option<ValueId>>>,
    at_entry: Vec<HashMap<Reg, ValueId>>,
    before_throw: Vec<Option<Vec<Option<ValueId>>>>,
    filled: Vec<bool>,
    sealed: Vec<bool>,
    incomplete: Vec<Vec<(Reg, ValueId)>>,
}

impl<'a> SsaConstruction<'a> {
    fn new(method: &'a EncodedMethod, raw: &'a RawCode) -> Result<Self> {
        let expected_ins = method.id.proto.arity() + usize::from(!method.is_static());
        if usize::from(raw.ins) != expected_ins || raw.ins > raw.registers {
            return Err(malformed_error!(
                "{}: {} argument registers for {} arguments in a frame of {}",
                method.id,
                raw.ins,
                expected_ins,
                raw.registers
            ));
        }
        if raw.instructions.is_empty() {
            return Err(malformed_error!("{}: empty code", method.id));
        }
        Ok(Self {
            method,
            raw,
            code: IrCode::new(method.id.clone()),
            registers: usize::from(raw.registers),
            ranges: Vec::new(),
            block_at: HashMap::new(),
            successors: Vec::new(),
            exceptional: HashSet::new(),
            throwing: Vec::new(),
            local: Vec::new(),
            at_entry: Vec::new(),
            before_throw: Vec::new(),
            filled: Vec::new(),
            sealed: Vec::new(),
            incomplete: Vec::new(),
        })
    }

    fn run(mut self) -> Result<IrCode> {
        self.build_cfg()?;

        let order = reverse_postorder(&BlockSuccessors(self.successors.clone()), NodeId::new(0));
        for node in order {
            let block = BlockId::new(node.index());
            self.try_seal(block)?;
            self.fill(block)?;
            self.filled[block.index()] = true;
            for succ in self.successors[block.index()].clone() {
                self.try_seal(succ)?;
            }
        }
        if let Some(b) = self.sealed.iter().position(|s| !s) {
            return Err(invariant_error!(
                "{}: block B{} was never sealed",
                self.method.id,
                b
            ));
        }

        self.remove_trivial_phis()?;
        Ok(self.code)
    }

    /// Splits the raw code into blocks, keeps the reachable ones and sets up the predecessor
    /// lists of the IR blocks. IR block 0 is a dedicated entry holding the arguments.
    fn build_cfg(&mut self) -> Result<()> {
        let raw = self.raw;
        let method = self.method;
        let len = raw.instructions.len();
        let check_target = |target: usize| {
            if target < len {
                Ok(target)
            } else {
                Err(malformed_error!(
                    "{}: branch target {} outside of code",
                    method.id,
                    target
                ))
            }
        };

        let mut leaders = vec![0usize];
        for (i, instruction) in raw.instructions.iter().enumerate() {
            for target in instruction.targets() {
                leaders.push(check_target(target)?);
            }
            if instruction.is_branch() && i + 1 < len {
                leaders.push(i + 1);
            }
            if instruction.can_throw() && !raw.handlers_at(i).is_empty() {
                let after_result = instruction.has_pending_result()
                    && matches!(raw.instructions.get(i + 1), Some(RawInstruction::MoveResult { .. }));
                let next = if after_result { i + 2 } else { i + 1 };
                if next < len {
                    leaders.push(next);
                }
            }
        }
        for try_block in &raw.tries {
            if try_block.start >= try_block.end || try_block.end > len {
                return Err(malformed_error!(
                    "{}: invalid try range {}..{}",
                    self.method.id,
                    try_block.start,
                    try_block.end
                ));
            }
            leaders.push(try_block.start);
            if try_block.end < len {
                leaders.push(try_block.end);
            }
            for handler in &try_block.handlers {
                leaders.push(check_target(handler.target)?);
            }
        }
        leaders.sort_unstable();
        leaders.dedup();

        // Raw blocks and their successors, as raw block indices.
        let raw_ranges: Vec<(usize, usize)> = leaders
            .iter()
            .enumerate()
            .map(|(k, &start)| (start, leaders.get(k + 1).copied().unwrap_or(len)))
            .collect();
        let raw_index: HashMap<usize, usize> =
            leaders.iter().enumerate().map(|(k, &s)| (s, k)).collect();

        let mut raw_succs = Vec::with_capacity(raw_ranges.len());
        let mut raw_catches = Vec::with_capacity(raw_ranges.len());
        let mut raw_throwing = Vec::with_capacity(raw_ranges.len());
        for &(start, end) in &raw_ranges {
            let last = &raw.instructions[end - 1];
            let mut succs: Vec<usize> = last
                .targets()
                .iter()
                .map(|t| raw_index[t])
                .collect();
            if !last.ends_flow() {
                if end >= len {
                    return Err(malformed_error!(
                        "{}: control falls off the end of the code",
                        self.method.id
                    ));
                }
                succs.push(raw_index[&end]);
            }
            let throwing = (start..end).find(|&i| raw.instructions[i].can_throw());
            let mut catches = Vec::new();
            if let Some(i) = throwing {
                for handler in raw.handlers_at(i) {
                    let target = raw_index[&handler.target];
                    if succs.contains(&target) {
                        return Err(malformed_error!(
                            "{}: instruction {} is both a normal and an exceptional successor",
                            self.method.id,
                            handler.target
                        ));
                    }
                    catches.push((handler.guard.clone(), target));
                }
            }
            raw_throwing.push(if catches.is_empty() { None } else { throwing });
            raw_succs.push(succs);
            raw_catches.push(catches);
        }

        // Reachability from the first instruction.
        let mut reachable = vec![false; raw_ranges.len()];
        let mut stack = vec![0usize];
        while let Some(r) = stack.pop() {
            if std::mem::replace(&mut reachable[r], true) {
                continue;
            }
            stack.extend(raw_succs[r].iter().copied());
            stack.extend(raw_catches[r].iter().map(|(_, t)| *t));
        }

        // IR numbering: entry, then reachable raw blocks in code order.
        let mut ir_of_raw = vec![None; raw_ranges.len()];
        self.ranges.push((0, 0));
        self.throwing.push(None);
        for (r, &range) in raw_ranges.iter().enumerate() {
            if reachable[r] {
                let id = self.code.add_block();
                ir_of_raw[r] = Some(id);
                self.ranges.push(range);
                self.throwing.push(raw_throwing[r]);
                self.block_at.insert(range.0, id);
            }
        }
        let ir = |r: usize| ir_of_raw[r].unwrap_or(BlockId::ENTRY);

        let count = self.code.block_count();
        self.successors = vec![Vec::new(); count];
        self.successors[0].push(ir(0));
        for (r, succs) in raw_succs.iter().enumerate() {
            if !reachable[r] {
                continue;
            }
            let from = ir(r);
            let mut list: Vec<BlockId> = Vec::new();
            for &s in succs {
                if !list.contains(&ir(s)) {
                    list.push(ir(s));
                }
            }
            let mut handlers = Vec::new();
            for (guard, t) in &raw_catches[r] {
                let target = ir(*t);
                handlers.push(CatchHandler {
                    guard: guard.clone(),
                    target,
                });
                if !list.contains(&target) {
                    list.push(target);
                }
                self.exceptional.insert((from, target));
            }
            self.code.block_mut(from).catch_handlers = handlers;
            self.successors[from.index()] = list;
        }
        for b in 0..count {
            for succ in self.successors[b].clone() {
                self.code
                    .block_mut(succ)
                    .predecessors
                    .push(BlockId::new(b));
            }
        }

        self.local = vec![vec![None; self.registers]; count];
        self.at_entry = vec![HashMap::new(); count];
        self.before_throw = vec![None; count];
        self.filled = vec![false; count];
        self.sealed = vec![false; count];
        self.incomplete = vec![Vec::new(); count];
        Ok(())
    }

    fn target(&self, index: usize) -> Result<BlockId> {
        self.block_at.get(&index).copied().ok_or_else(|| {
            malformed_error!("{}: no block starts at {}", self.method.id, index)
        })
    }

    fn try_seal(&mut self, block: BlockId) -> Result<()> {
        if self.sealed[block.index()] {
            return Ok(());
        }
        let ready = self
            .code
            .block(block)
            .predecessors
            .iter()
            .all(|p| self.filled[p.index()]);
        if !ready {
            return Ok(());
        }
        self.sealed[block.index()] = true;
        for (reg, phi) in std::mem::take(&mut self.incomplete[block.index()]) {
            self.add_phi_operands(block, reg, phi)?;
        }
        Ok(())
    }

    fn write(&mut self, block: BlockId, reg: Reg, value: ValueId) -> Result<()> {
        let slot = self.local[block.index()]
            .get_mut(usize::from(reg))
            .ok_or_else(|| {
                malformed_error!("{}: register r{} out of range", self.method.id, reg)
            })?;
        *slot = Some(value);
        Ok(())
    }

    fn read(&mut self, block: BlockId, reg: Reg) -> Result<ValueId> {
        match self.local[block.index()].get(usize::from(reg)) {
            None => Err(malformed_error!(
                "{}: register r{} out of range",
                self.method.id,
                reg
            )),
            Some(Some(value)) => Ok(*value),
            Some(None) => self.read_at_entry(block, reg),
        }
    }

    /// Reads `reg` as it is when control leaves `pred` towards `succ`.
    fn read_at_exit(&mut self, pred: BlockId, succ: BlockId, reg: Reg) -> Result<ValueId> {
        if self.exceptional.contains(&(pred, succ)) {
            if let Some(snapshot) = &self.before_throw[pred.index()] {
                return match snapshot[usize::from(reg)] {
                    Some(value) => Ok(value),
                    None => self.read_at_entry(pred, reg),
                };
            }
        }
        self.read(pred, reg)
    }

    fn read_at_entry(&mut self, block: BlockId, reg: Reg) -> Result<ValueId> {
        if let Some(&value) = self.at_entry[block.index()].get(&reg) {
            return Ok(value);
        }
        let preds = self.code.block(block).predecessors.clone();
        if !self.sealed[block.index()] {
            let phi = self.new_phi(block);
            self.incomplete[block.index()].push((reg, phi));
            self.at_entry[block.index()].insert(reg, phi);
            return Ok(phi);
        }
        match preds.as_slice() {
            [] => Err(malformed_error!(
                "{}: register r{} is read before it is defined",
                self.method.id,
                reg
            )),
            [pred] => {
                let value = self.read_at_exit(*pred, block, reg)?;
                self.at_entry[block.index()].insert(reg, value);
                Ok(value)
            }
            _ => {
                let phi = self.new_phi(block);
                self.at_entry[block.index()].insert(reg, phi);
                self.add_phi_operands(block, reg, phi)?;
                Ok(phi)
            }
        }
    }

    fn new_phi(&mut self, block: BlockId) -> ValueId {
        let dest = self.code.new_value(ValueType::Reference);
        self.code.block_mut(block).phis.push(Phi {
            dest,
            operands: Vec::new(),
        });
        dest
    }

    fn add_phi_operands(&mut self, block: BlockId, reg: Reg, phi: ValueId) -> Result<()> {
        let preds = self.code.block(block).predecessors.clone();
        let mut operands = Vec::with_capacity(preds.len());
        for pred in preds {
            operands.push(self.read_at_exit(pred, block, reg)?);
        }
        if let Some(&typed) = operands.iter().find(|&&o| o != phi) {
            let ty = self.code.value_type(typed);
            self.code.set_value_type(phi, ty);
        }
        if let Some(entry) = self
            .code
            .block_mut(block)
            .phis
            .iter_mut()
            .find(|p| p.dest == phi)
        {
            entry.operands = operands;
        }
        Ok(())
    }

    fn fill(&mut self, block: BlockId) -> Result<()> {
        if block == BlockId::ENTRY {
            return self.fill_entry();
        }
        let (start, end) = self.ranges[block.index()];
        let raw = self.raw;
        let mut index = start;
        while index < end {
            if self.throwing[block.index()] == Some(index) {
                self.before_throw[block.index()] = Some(self.local[block.index()].clone());
            }
            let consumed = self.translate(block, index, end)?;
            index += consumed;
        }

        let last = &raw.instructions[end - 1];
        if !last.is_branch() {
            let next = self.target(end)?;
            self.code
                .block_mut(block)
                .instructions
                .push(IrOp::Goto { target: next });
        }
        Ok(())
    }

    fn fill_entry(&mut self) -> Result<()> {
        let method = self.method;
        let mut types = Vec::new();
        if !method.is_static() {
            types.push(ValueType::Reference);
        }
        types.extend(method.id.proto.parameters.iter().map(TypeName::value_type));
        for (index, ty) in types.into_iter().enumerate() {
            let dest = self.code.new_value(ty);
            let index = u16::try_from(index)
                .map_err(|_| malformed_error!("{}: too many arguments", method.id))?;
            self.code
                .block_mut(BlockId::ENTRY)
                .instructions
                .push(IrOp::Argument { dest, index });
            self.write(BlockId::ENTRY, index, dest)?;
        }
        let first = self.target(0)?;
        self.code
            .block_mut(BlockId::ENTRY)
            .instructions
            .push(IrOp::Goto { target: first });
        Ok(())
    }

    fn push(&mut self, block: BlockId, op: IrOp) {
        self.code.block_mut(block).instructions.push(op);
    }

    fn define(&mut self, block: BlockId, reg: Reg, ty: ValueType) -> Result<ValueId> {
        let value = self.code.new_value(ty);
        self.write(block, reg, value)?;
        Ok(value)
    }

    /// Picks up the result of an instruction at `index` from a following `move-result`.
    fn pending_result(
        &mut self,
        block: BlockId,
        index: usize,
        end: usize,
        ty: Option<ValueType>,
    ) -> Result<(Option<ValueId>, usize)> {
        match (self.raw.instructions.get(index + 1), ty) {
            (Some(RawInstruction::MoveResult { dest }), Some(ty)) if index + 1 < end => {
                let value = self.define(block, *dest, ty)?;
                Ok((Some(value), 2))
            }
            (Some(RawInstruction::MoveResult { .. }), None) if index + 1 < end => Err(
                malformed_error!("{}: move-result after a void call at {}", self.method.id, index),
            ),
            _ => Ok((None, 1)),
        }
    }

    /// Translates the instruction at `index`; returns the number of raw instructions consumed.
    #[allow(clippy::too_many_lines)]
    fn translate(&mut self, block: BlockId, index: usize, end: usize) -> Result<usize> {
        let raw = self.raw;
        let op = match &raw.instructions[index] {
            RawInstruction::Nop => return Ok(1),
            RawInstruction::Position { line } => IrOp::Position { line: *line },
            RawInstruction::Const { dest, value } => {
                let value = value.clone();
                let d = self.define(block, *dest, value.value_type())?;
                IrOp::Const { dest: d, value }
            }
            RawInstruction::ConstString { dest, value, .. } => {
                let d = self.define(block, *dest, ValueType::Reference)?;
                IrOp::Const {
                    dest: d,
                    value: ConstValue::String(value.clone()),
                }
            }
            RawInstruction::Move { dest, src } => {
                let value = self.read(block, *src)?;
                self.write(block, *dest, value)?;
                return Ok(1);
            }
            RawInstruction::MoveResult { .. } => {
                return Err(malformed_error!(
                    "{}: move-result at {} does not follow a call",
                    self.method.id,
                    index
                ));
            }
            RawInstruction::MoveException { dest } => {
                let handler_only = {
                    let ir_block = self.code.block(block);
                    ir_block.instructions.is_empty()
                        && !ir_block.predecessors.is_empty()
                        && ir_block
                            .predecessors
                            .iter()
                            .all(|&p| self.exceptional.contains(&(p, block)))
                };
                if !handler_only {
                    return Err(malformed_error!(
                        "{}: move-exception at {} outside of a handler entry",
                        self.method.id,
                        index
                    ));
                }
                let d = self.define(block, *dest, ValueType::Reference)?;
                IrOp::MoveException { dest: d }
            }
            RawInstruction::Binary {
                op,
                ty,
                dest,
                left,
                right,
            } => {
                let l = self.read(block, *left)?;
                let r = self.read(block, *right)?;
                let result_ty = match op {
                    crate::program::BinaryOp::Cmp => ValueType::Int,
                    _ => ty.value_type(),
                };
                let d = self.define(block, *dest, result_ty)?;
                IrOp::Binary {
                    op: *op,
                    ty: *ty,
                    dest: d,
                    left: l,
                    right: r,
                }
            }
            RawInstruction::Unary { op, dest, src } => {
                let s = self.read(block, *src)?;
                let ty = match op {
                    UnaryOp::IntToLong => ValueType::Long,
                    UnaryOp::LongToInt => ValueType::Int,
                    UnaryOp::Neg | UnaryOp::Not => self.code.value_type(s),
                };
                let d = self.define(block, *dest, ty)?;
                IrOp::Unary {
                    op: *op,
                    dest: d,
                    src: s,
                }
            }
            RawInstruction::Goto { target } => IrOp::Goto {
                target: self.target(*target)?,
            },
            RawInstruction::If {
                cond,
                left,
                right,
                target,
            } => {
                let l = self.read(block, *left)?;
                let r = match right {
                    Some(right) => Some(self.read(block, *right)?),
                    None => None,
                };
                IrOp::If {
                    cond: *cond,
                    left: l,
                    right: r,
                    then_block: self.target(*target)?,
                    else_block: self.target(index + 1)?,
                }
            }
            RawInstruction::Switch {
                value,
                keys,
                targets,
            } => {
                let v = self.read(block, *value)?;
                let targets = targets
                    .iter()
                    .map(|t| self.target(*t))
                    .collect::<Result<Vec<_>>>()?;
                IrOp::Switch {
                    value: v,
                    keys: keys.clone(),
                    targets,
                    fallthrough: self.target(index + 1)?,
                }
            }
            RawInstruction::Return { value } => IrOp::Return {
                value: match value {
                    Some(reg) => Some(self.read(block, *reg)?),
                    None => None,
                },
            },
            RawInstruction::Throw { value } => IrOp::Throw {
                value: self.read(block, *value)?,
            },
            RawInstruction::Invoke { kind, method, args } => {
                let args = self.read_all(block, args)?;
                let ret = &method.proto.return_type;
                let ty = (!ret.is_void()).then(|| ret.value_type());
                let (dest, consumed) = self.pending_result(block, index, end, ty)?;
                self.push(
                    block,
                    IrOp::Invoke {
                        kind: *kind,
                        method: method.clone(),
                        args,
                        dest,
                    },
                );
                return Ok(consumed);
            }
            RawInstruction::InvokeCustom { call_site, args } => {
                let args = self.read_all(block, args)?;
                let (dest, consumed) =
                    self.pending_result(block, index, end, Some(ValueType::Reference))?;
                self.push(
                    block,
                    IrOp::InvokeCustom {
                        call_site: call_site.clone(),
                        args,
                        dest,
                    },
                );
                return Ok(consumed);
            }
            RawInstruction::FilledNewArray { ty, args } => {
                let args = self.read_all(block, args)?;
                let (dest, consumed) =
                    self.pending_result(block, index, end, Some(ValueType::Reference))?;
                self.push(
                    block,
                    IrOp::FilledNewArray {
                        dest,
                        ty: ty.clone(),
                        args,
                    },
                );
                return Ok(consumed);
            }
            RawInstruction::NewInstance { dest, ty } => IrOp::NewInstance {
                dest: self.define(block, *dest, ValueType::Reference)?,
                ty: ty.clone(),
            },
            RawInstruction::NewArray { dest, size, ty } => {
                let size = self.read(block, *size)?;
                IrOp::NewArray {
                    dest: self.define(block, *dest, ValueType::Reference)?,
                    size,
                    ty: ty.clone(),
                }
            }
            RawInstruction::ArrayGet {
                dest,
                array,
                index: idx,
                ty,
            } => {
                let array = self.read(block, *array)?;
                let idx = self.read(block, *idx)?;
                IrOp::ArrayGet {
                    dest: self.define(block, *dest, *ty)?,
                    array,
                    index: idx,
                    ty: *ty,
                }
            }
            RawInstruction::ArrayPut {
                value,
                array,
                index: idx,
                ty,
            } => IrOp::ArrayPut {
                value: self.read(block, *value)?,
                array: self.read(block, *array)?,
                index: self.read(block, *idx)?,
                ty: *ty,
            },
            RawInstruction::ArrayLength { dest, array } => {
                let array = self.read(block, *array)?;
                IrOp::ArrayLength {
                    dest: self.define(block, *dest, ValueType::Int)?,
                    array,
                }
            }
            RawInstruction::InstanceGet {
                dest,
                object,
                field,
            } => {
                let object = self.read(block, *object)?;
                IrOp::InstanceGet {
                    dest: self.define(block, *dest, field.ty.value_type())?,
                    object,
                    field: field.clone(),
                }
            }
            RawInstruction::InstancePut {
                value,
                object,
                field,
            } => IrOp::InstancePut {
                value: self.read(block, *value)?,
                object: self.read(block, *object)?,
                field: field.clone(),
            },
            RawInstruction::StaticGet { dest, field } => IrOp::StaticGet {
                dest: self.define(block, *dest, field.ty.value_type())?,
                field: field.clone(),
            },
            RawInstruction::StaticPut { value, field } => IrOp::StaticPut {
                value: self.read(block, *value)?,
                field: field.clone(),
            },
            RawInstruction::CheckCast { value, ty } => {
                let v = self.read(block, *value)?;
                IrOp::CheckCast {
                    dest: self.define(block, *value, ValueType::Reference)?,
                    value: v,
                    ty: ty.clone(),
                }
            }
            RawInstruction::InstanceOf { dest, value, ty } => {
                let v = self.read(block, *value)?;
                IrOp::InstanceOf {
                    dest: self.define(block, *dest, ValueType::Int)?,
                    value: v,
                    ty: ty.clone(),
                }
            }
        };
        self.push(block, op);
        Ok(1)
    }

    fn read_all(&mut self, block: BlockId, regs: &[Reg]) -> Result<Vec<ValueId>> {
        regs.iter().map(|r| self.read(block, *r)).collect()
    }

    /// Removes phis whose operands are all the same value (or the phi itself), repeating until
    /// no such phi is left.
    fn remove_trivial_phis(&mut self) -> Result<()> {
        let mut alias: HashMap<ValueId, ValueId> = HashMap::new();
        let resolve = |alias: &HashMap<ValueId, ValueId>, mut v: ValueId| {
            while let Some(&next) = alias.get(&v) {
                v = next;
            }
            v
        };

        let mut changed = true;
        while changed {
            changed = false;
            for b in 0..self.code.block_count() {
                let block = BlockId::new(b);
                for phi in &self.code.block(block).phis {
                    if alias.contains_key(&phi.dest) {
                        continue;
                    }
                    let mut unique = None;
                    let mut trivial = true;
                    for &operand in &phi.operands {
                        let operand = resolve(&alias, operand);
                        if operand == phi.dest || Some(operand) == unique {
                            continue;
                        }
                        if unique.is_some() {
                            trivial = false;
                            break;
                        }
                        unique = Some(operand);
                    }
                    if !trivial {
                        continue;
                    }
                    let Some(unique) = unique else {
                        return Err(malformed_error!(
                            "{}: {} has no defined operand",
                            self.method.id,
                            phi.dest
                        ));
                    };
                    alias.insert(phi.dest, unique);
                    changed = true;
                }
            }
        }

        for b in 0..self.code.block_count() {
            self.code
                .block_mut(BlockId::new(b))
                .phis
                .retain(|p| !alias.contains_key(&p.dest));
        }
        self.code.replace_uses_with(&alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::{CodeAssembler, IfCond, InvokeKind, MethodFlags, MethodId, TypeName},
        Error,
    };

    fn method(signature: &str, flags: MethodFlags, code: RawCode) -> EncodedMethod {
        EncodedMethod::new(MethodId::parse(signature).unwrap(), flags, Some(code))
    }

    fn build(signature: &str, code: RawCode) -> Result<IrCode> {
        let method = method(signature, MethodFlags::STATIC, code);
        Ok(RegisterIrBuilder.build_ir(&method)?.unwrap())
    }

    #[test]
    fn test_straight_line() {
        let mut asm = CodeAssembler::new(3, 2);
        asm.add_int(2, 0, 1).return_value(2);
        let code = build("t.T.add(int,int)int", asm.finish().unwrap()).unwrap();
        code.verify_ssa().unwrap();
        assert_eq!(code.block_count(), 2);
        assert_eq!(code.instruction_count(), 2);
    }

    #[test]
    fn test_loop_creates_phi() {
        // int count(int n) { int i = 0; while (i < n) i = i + 1; return i; }
        let mut asm = CodeAssembler::new(3, 1);
        let (head, exit) = (asm.new_label(), asm.new_label());
        asm.const_int(1, 0)
            .const_int(2, 1)
            .bind(head)
            .if_cmp(IfCond::Ge, 1, 0, exit)
            .add_int(1, 1, 2)
            .goto(head)
            .bind(exit)
            .return_value(1);
        let code = build("t.T.count(int)int", asm.finish().unwrap()).unwrap();
        code.verify_ssa().unwrap();
        let phis: usize = code.blocks().iter().map(|b| b.phis.len()).sum();
        assert_eq!(phis, 1);
    }

    #[test]
    fn test_trivial_phis_removed() {
        let mut asm = CodeAssembler::new(2, 1);
        let (other, join) = (asm.new_label(), asm.new_label());
        asm.const_int(1, 7)
            .if_zero(IfCond::Eq, 0, other)
            .goto(join)
            .bind(other)
            .push(RawInstruction::Nop)
            .bind(join)
            .return_value(1);
        let code = build("t.T.m(int)int", asm.finish().unwrap()).unwrap();
        code.verify_ssa().unwrap();
        assert!(code.blocks().iter().all(|b| b.phis.is_empty()));
    }

    #[test]
    fn test_undefined_register() {
        let mut asm = CodeAssembler::new(2, 0);
        asm.return_value(1);
        let err = build("t.T.m()int", asm.finish().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_argument_count_mismatch() {
        let mut asm = CodeAssembler::new(1, 1);
        asm.return_void();
        assert!(build("t.T.m()void", asm.finish().unwrap()).is_err());
    }

    #[test]
    fn test_handler_sees_value_before_throw() {
        // r0 = 1; try { r0 = call() } catch { return r0 }; return r0
        let call = MethodId::parse("t.T.call()int").unwrap();
        let mut asm = CodeAssembler::new(2, 0);
        let (start, end, handler) = (asm.new_label(), asm.new_label(), asm.new_label());
        asm.const_int(0, 1)
            .bind(start)
            .invoke(InvokeKind::Static, call, &[])
            .move_result(0)
            .bind(end)
            .return_value(0)
            .bind(handler)
            .move_exception(1)
            .return_value(0)
            .try_range(start, end, &[(Some(TypeName::new("java.lang.Exception")), handler)]);
        let code = build("t.T.m()int", asm.finish().unwrap()).unwrap();
        code.verify_ssa().unwrap();

        let handler_block = code
            .block_ids()
            .find(|&b| {
                matches!(
                    code.block(b).instructions.first(),
                    Some(IrOp::MoveException { .. })
                )
            })
            .unwrap();
        let Some(IrOp::Return { value: Some(returned) }) =
            code.block(handler_block).instructions.last()
        else {
            panic!("handler must return");
        };
        let Some(IrOp::Const { dest, .. }) = code
            .instructions()
            .map(|(_, op)| op)
            .find(|op| matches!(op, IrOp::Const { .. }))
        else {
            panic!("constant expected");
        };
        assert_eq!(returned, dest);
    }

    #[test]
    fn test_abstract_method_not_representable() {
        let id = MethodId::parse("t.T.m()void").unwrap();
        let method = EncodedMethod::new(id, MethodFlags::ABSTRACT, None);
        assert!(RegisterIrBuilder.build_ir(&method).unwrap().is_none());
    }
}
