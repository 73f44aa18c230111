//! Linear-scan register allocation.
//!
//! Takes optimized SSA [`IrCode`] to [`RegisterCode`], where every value name is a register:
//!
//! 1. **Preconditions**: every definition without side effects must be used; dead code is
//!    eliminated right before allocation.
//! 2. **Landing pads**: a handler reached exceptionally from several blocks gets one pad per
//!    predecessor, so the values flowing into it can be moved on an edge of their own. The
//!    caught exception becomes a phi over the pads' `move-exception`s.
//! 3. **Critical edges** are split.
//! 4. **Intervals**: instructions are numbered in reverse postorder and every value gets a
//!    [`LiveInterval`].
//! 5. **Scan**: [`LinearScan`] assigns registers, pre-colouring the arguments to their
//!    incoming registers and splitting intervals once the register limit is reached.
//! 6. **Resolution**: split intervals get a move where the register changes; every edge gets
//!    the parallel move that transfers phi operands and live-in values to the registers the
//!    successor expects.
//!
//! [`peephole`] then cleans up the moves and branches the allocation introduced.

mod code;
mod intervals;
mod linear_scan;
mod moves;
pub mod peephole;

use std::collections::HashMap;

pub use code::{RegisterBlock, RegisterCode};
pub use intervals::{build_intervals, LiveInterval, LiveRange, Numbering};
pub use linear_scan::{LinearScan, ScanResult};
pub use moves::{needs_scratch, sequentialize, Move};

use crate::{
    analysis::ir::{BlockId, IrCode, IrOp, Liveness, Phi, ValueId},
    compiler::{CompilerOptions, EventKind, EventLog},
    program::{MethodId, Reg, ValueType},
    Error, Result,
};

/// Registers assigned to the pieces of every value.
#[derive(Debug, Clone)]
pub struct RegisterAllocation {
    method: MethodId,
    intervals: Vec<LiveInterval>,
    by_value: HashMap<ValueId, Vec<usize>>,
    registers: u16,
    numbering: Numbering,
    liveness: Liveness,
}

impl RegisterAllocation {
    fn new(
        method: MethodId,
        scan: ScanResult,
        numbering: Numbering,
        liveness: Liveness,
    ) -> Self {
        let mut by_value: HashMap<ValueId, Vec<usize>> = HashMap::new();
        for (index, interval) in scan.intervals.iter().enumerate() {
            by_value.entry(interval.value).or_default().push(index);
        }
        for pieces in by_value.values_mut() {
            pieces.sort_by_key(|&index| scan.intervals[index].start());
        }
        Self {
            method,
            intervals: scan.intervals,
            by_value,
            registers: scan.registers,
            numbering,
            liveness,
        }
    }

    /// Returns every interval piece.
    #[must_use]
    pub fn intervals(&self) -> &[LiveInterval] {
        &self.intervals
    }

    /// Returns the pieces of `value` by start position.
    pub fn pieces(&self, value: ValueId) -> impl Iterator<Item = &LiveInterval> {
        self.by_value
            .get(&value)
            .into_iter()
            .flatten()
            .map(|&index| &self.intervals[index])
    }

    /// Returns the number of registers the intervals use.
    #[must_use]
    pub fn registers(&self) -> u16 {
        self.registers
    }

    /// Returns the instruction numbering the intervals refer to.
    #[must_use]
    pub fn numbering(&self) -> &Numbering {
        &self.numbering
    }

    /// Returns the register holding `value` at `position`.
    #[must_use]
    pub fn register_at(&self, value: ValueId, position: u32) -> Option<Reg> {
        self.pieces(value)
            .find(|piece| piece.covers(position))
            .and_then(|piece| piece.register)
    }

    /// Returns the lowest allocated register that holds no live value at any of `positions`
    /// and is not read or written by `moves`.
    #[must_use]
    pub fn free_register(&self, positions: &[u32], moves: &[Move]) -> Option<Reg> {
        (0..self.registers).find(|&register| {
            !moves
                .iter()
                .any(|m| m.dest == register || m.src == register)
                && !self.intervals.iter().any(|interval| {
                    interval.register == Some(register)
                        && positions.iter().any(|&p| interval.covers(p))
                })
        })
    }

    fn location(&self, value: ValueId, position: u32) -> Result<Reg> {
        self.register_at(value, position).ok_or_else(|| {
            invariant_error!(
                "{}: {} has no register at position {}",
                self.method,
                value,
                position
            )
        })
    }

    /// Checks that every piece has a register and that no two pieces sharing a register are
    /// live at the same position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] naming the first conflict.
    pub fn verify(&self) -> Result<()> {
        let mut by_register: HashMap<Reg, Vec<&LiveInterval>> = HashMap::new();
        for interval in &self.intervals {
            let Some(register) = interval.register else {
                return Err(invariant_error!(
                    "{}: {} has no register",
                    self.method,
                    interval
                ));
            };
            by_register.entry(register).or_default().push(interval);
        }
        for (register, pieces) in &by_register {
            for (i, a) in pieces.iter().enumerate() {
                for b in &pieces[i + 1..] {
                    if let Some(position) = a.first_intersection(b) {
                        return Err(invariant_error!(
                            "{}: {} and {} both hold r{} at {}",
                            self.method,
                            a.value,
                            b.value,
                            register,
                            position
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fails if a definition without side effects is never used.
///
/// # Errors
///
/// Returns [`Error::InvariantViolation`] naming the dead definition.
pub fn check_allocatable(code: &IrCode) -> Result<()> {
    let uses = code.use_counts();
    for block in code.block_ids() {
        let current = code.block(block);
        for phi in &current.phis {
            if uses[phi.dest.index()] == 0 {
                return Err(invariant_error!(
                    "{}: phi {} in {} is never used",
                    code.method(),
                    phi.dest,
                    block
                ));
            }
        }
        for op in &current.instructions {
            let Some(dest) = op.dest() else {
                continue;
            };
            if uses[dest.index()] == 0
                && !op.has_side_effects()
                && !matches!(op, IrOp::MoveException { .. })
            {
                return Err(invariant_error!(
                    "{}: dead definition `{}` in {}",
                    code.method(),
                    op,
                    block
                ));
            }
        }
    }
    Ok(())
}

/// Gives every handler reached only exceptionally from several blocks one pad block per
/// predecessor. Returns the number of pads.
pub fn insert_landing_pads(code: &mut IrCode) -> usize {
    let mut inserted = 0;
    for handler in code.block_ids().collect::<Vec<_>>() {
        let predecessors = code.block(handler).predecessors.clone();
        if predecessors.len() < 2
            || !predecessors
                .iter()
                .all(|&pred| code.block(pred).is_exceptional_successor(handler))
        {
            continue;
        }
        let exception = match code.block(handler).instructions.first() {
            Some(IrOp::MoveException { dest }) => Some(*dest),
            _ => None,
        };

        let mut operands = Vec::with_capacity(predecessors.len());
        for (index, &pred) in predecessors.iter().enumerate() {
            let pad = code.add_block();
            let mut instructions = Vec::with_capacity(2);
            if exception.is_some() {
                let caught = code.new_value(ValueType::Reference);
                instructions.push(IrOp::MoveException { dest: caught });
                operands.push(caught);
            }
            instructions.push(IrOp::Goto { target: handler });
            let block = code.block_mut(pad);
            block.instructions = instructions;
            block.predecessors.push(pred);

            for entry in &mut code.block_mut(pred).catch_handlers {
                if entry.target == handler {
                    entry.target = pad;
                }
            }
            code.block_mut(handler).predecessors[index] = pad;
            inserted += 1;
        }

        if let Some(dest) = exception {
            let block = code.block_mut(handler);
            block.instructions.remove(0);
            block.phis.push(Phi { dest, operands });
        }
    }
    inserted
}

/// Registers past the allocated ones, claimed while resolving.
struct Scratch {
    base: u16,
    used: u16,
}

impl Scratch {
    fn claim(&mut self, slot: u16) -> Reg {
        self.used = self.used.max(slot + 1);
        self.base + slot
    }
}

/// Emits `moves` as a sequence. A cycle is broken through `free` when the allocation left a
/// register unused at the move point, through a scratch register otherwise.
fn emit_moves(moves: &[Move], free: Option<Reg>, scratch: &mut Scratch, out: &mut Vec<IrOp>) {
    let temp = if needs_scratch(moves) {
        free.unwrap_or_else(|| scratch.claim(0))
    } else {
        Reg::MAX
    };
    out.extend(sequentialize(moves, temp).into_iter().map(|m| IrOp::Move {
        dest: RegisterCode::value(m.dest),
        src: RegisterCode::value(m.src),
    }));
}

/// The register allocator.
pub struct LinearScanAllocator<'a> {
    options: &'a CompilerOptions,
    events: &'a EventLog,
}

impl<'a> LinearScanAllocator<'a> {
    /// Creates an allocator honouring `options.max_registers`.
    #[must_use]
    pub fn new(options: &'a CompilerOptions, events: &'a EventLog) -> Self {
        Self { options, events }
    }

    /// Prepares `code` and assigns registers to its values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if `code` contains a dead definition and
    /// [`Error::RegisterPressure`] if the values do not fit the register limit.
    pub fn assign(&self, code: &mut IrCode, ins: u16) -> Result<RegisterAllocation> {
        check_allocatable(code)?;
        insert_landing_pads(code);
        code.split_critical_edges();

        let numbering = Numbering::new(code);
        let liveness = Liveness::compute(code);
        let mut intervals = build_intervals(code, &numbering, &liveness);

        let mut hints = HashMap::new();
        for block in code.block_ids() {
            let current = code.block(block);
            for phi in &current.phis {
                if let Some(&first) = phi.operands.first() {
                    hints.insert(phi.dest, first);
                }
            }
            for op in &current.instructions {
                match op {
                    IrOp::Argument { dest, index } => {
                        let interval = &mut intervals[dest.index()];
                        interval.fixed = true;
                        interval.register = Some(*index);
                    }
                    IrOp::Move { dest, src } => {
                        hints.insert(*dest, *src);
                    }
                    _ => {}
                }
            }
        }

        let method = code.method().clone();
        let split_position = |until: u32| {
            let at = until - until % 2;
            match numbering.instruction_at(at) {
                Some((block, 0))
                    if matches!(
                        code.block(block).instructions.first(),
                        Some(IrOp::MoveException { .. })
                    ) =>
                {
                    Some(numbering.block_from(block))
                }
                _ => Some(at),
            }
        };
        let scan = LinearScan::new(&method, ins, self.options.max_registers, &hints)
            .run(intervals, split_position)?;

        let allocation = RegisterAllocation::new(method, scan, numbering, liveness);
        for pieces in allocation.by_value.values() {
            for &index in pieces.iter().skip(1) {
                self.events
                    .record(EventKind::IntervalSplit)
                    .method(allocation.method.clone())
                    .message(allocation.intervals[index].to_string())
                    .pass("register-allocation");
            }
        }
        Ok(allocation)
    }

    /// Allocates registers for `code`, whose first `ins` registers receive the arguments.
    ///
    /// # Errors
    ///
    /// See [`Self::assign`]; additionally fails if resolution needs scratch registers beyond
    /// the limit.
    pub fn allocate(&self, code: &mut IrCode, ins: u16) -> Result<RegisterCode> {
        let allocation = self.assign(code, ins)?;
        if self.options.verify_ssa {
            allocation.verify()?;
        }
        self.resolve(code, &allocation, ins)
    }

    fn resolve(
        &self,
        code: &IrCode,
        allocation: &RegisterAllocation,
        ins: u16,
    ) -> Result<RegisterCode> {
        let numbering = allocation.numbering();
        let method = code.method();

        let mut split_moves: HashMap<u32, Vec<Move>> = HashMap::new();
        for pieces in allocation.by_value.values() {
            for pair in pieces.windows(2) {
                let (previous, next) = (&allocation.intervals[pair[0]], &allocation.intervals[pair[1]]);
                let start = next.start();
                if numbering.instruction_at(start).is_none() || !previous.covers(start - 1) {
                    continue;
                }
                if let (Some(src), Some(dest)) = (previous.register, next.register) {
                    split_moves
                        .entry(start)
                        .or_default()
                        .push(Move::new(dest, src));
                }
            }
        }

        let mut entry_moves: HashMap<BlockId, Vec<Move>> = HashMap::new();
        let mut exit_moves: HashMap<BlockId, Vec<Move>> = HashMap::new();
        // positions whose live values the moves of a block must not clobber
        let mut guards: HashMap<(BlockId, bool), Vec<u32>> = HashMap::new();
        for &pred in numbering.order() {
            let source = code.block(pred);
            for succ in source.successors() {
                let exceptional = source.is_exceptional_successor(succ);
                let from = if exceptional {
                    let index = source.throwing_index().ok_or_else(|| {
                        invariant_error!("{}: {} has handlers but cannot throw", method, pred)
                    })?;
                    numbering.position(pred, index)
                } else {
                    numbering.block_to(pred) - 1
                };
                let to = numbering.block_from(succ);
                let target = code.block(succ);

                let mut moves = Vec::new();
                if let Some(slot) = target.predecessor_index(pred) {
                    for phi in &target.phis {
                        moves.push(Move::new(
                            allocation.location(phi.dest, to)?,
                            allocation.location(phi.operands[slot], from)?,
                        ));
                    }
                }
                for value in allocation.liveness.live_in(succ).iter() {
                    let value = ValueId::new(value);
                    moves.push(Move::new(
                        allocation.location(value, to)?,
                        allocation.location(value, from)?,
                    ));
                }
                moves.retain(|m| m.dest != m.src);
                if moves.is_empty() {
                    continue;
                }

                if target.predecessors.len() == 1 {
                    entry_moves.entry(succ).or_default().extend(moves);
                    guards.entry((succ, true)).or_default().extend([to, to + 1]);
                } else if !exceptional && source.successors().len() == 1 {
                    exit_moves.entry(pred).or_default().extend(moves);
                    guards
                        .entry((pred, false))
                        .or_default()
                        .extend([from.saturating_sub(1), from, to]);
                } else {
                    return Err(invariant_error!(
                        "{}: no place for the moves on {} -> {}",
                        method,
                        pred,
                        succ
                    ));
                }
            }
        }

        let mut scratch = Scratch {
            base: allocation.registers().max(ins),
            used: 0,
        };
        let mut blocks = Vec::with_capacity(numbering.order().len());
        for &block in numbering.order() {
            let source = code.block(block);
            let mut instructions = Vec::with_capacity(source.instructions.len());
            for (index, op) in source.instructions.iter().enumerate() {
                let position = numbering.position(block, index);
                if let Some(moves) = split_moves.get(&position) {
                    let free = allocation
                        .free_register(&[position.saturating_sub(1), position], moves);
                    emit_moves(moves, free, &mut scratch, &mut instructions);
                }
                if matches!(op, IrOp::Argument { .. }) {
                    continue;
                }
                let mut op = op.clone();
                let mut failure = None;
                op.for_each_use_mut(|value| match allocation.location(*value, position) {
                    Ok(register) => *value = RegisterCode::value(register),
                    Err(error) => {
                        failure.get_or_insert(error);
                    }
                });
                if let Some(error) = failure {
                    return Err(error);
                }
                if let Some(dest) = op.dest_mut() {
                    *dest = RegisterCode::value(allocation.location(*dest, position + 1)?);
                }
                instructions.push(op);
            }

            if let Some(moves) = entry_moves.get(&block) {
                let free = guards
                    .get(&(block, true))
                    .and_then(|positions| allocation.free_register(positions, moves));
                let mut prologue = Vec::with_capacity(moves.len() + 2);
                let mut at = 0;
                if let Some(IrOp::MoveException { dest }) = instructions.first_mut() {
                    at = 1;
                    let caught = RegisterCode::register(*dest);
                    if moves.iter().any(|m| m.src == caught) {
                        // the exception would clobber a source before it is read
                        let parked = scratch.claim(1);
                        *dest = RegisterCode::value(parked);
                        emit_moves(moves, free, &mut scratch, &mut prologue);
                        prologue.push(IrOp::Move {
                            dest: RegisterCode::value(caught),
                            src: RegisterCode::value(parked),
                        });
                    } else {
                        emit_moves(moves, free, &mut scratch, &mut prologue);
                    }
                } else {
                    emit_moves(moves, free, &mut scratch, &mut prologue);
                }
                instructions.splice(at..at, prologue);
            }
            if let Some(moves) = exit_moves.get(&block) {
                let free = guards
                    .get(&(block, false))
                    .and_then(|positions| allocation.free_register(positions, moves));
                let mut epilogue = Vec::with_capacity(moves.len() + 1);
                emit_moves(moves, free, &mut scratch, &mut epilogue);
                let at = instructions.len().saturating_sub(1);
                instructions.splice(at..at, epilogue);
            }

            blocks.push(RegisterBlock {
                id: block,
                instructions,
                catch_handlers: source.catch_handlers.clone(),
            });
        }

        let registers = scratch.base + scratch.used;
        if registers > self.options.max_registers {
            return Err(Error::RegisterPressure {
                method: method.clone(),
                limit: self.options.max_registers,
            });
        }
        Ok(RegisterCode {
            method: method.clone(),
            blocks,
            registers,
            ins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{IrBuilder, RegisterIrBuilder},
        program::{EncodedMethod, MethodId, TypeName},
        test::{method_from, program_with, Interpreter, Value},
    };

    fn ir(method: &EncodedMethod) -> IrCode {
        RegisterIrBuilder.build_ir(method).unwrap().unwrap()
    }

    fn allocate(method: &EncodedMethod, options: &CompilerOptions) -> Result<RegisterCode> {
        let events = EventLog::new();
        let mut code = ir(method);
        LinearScanAllocator::new(options, &events).allocate(&mut code, method.id.proto.arity() as u16)
    }

    fn products() -> EncodedMethod {
        // (a + b) + a * b
        method_from("p.A.f(int,int)int", 4, |asm| {
            asm.add_int(2, 0, 1)
                .mul_int(3, 0, 1)
                .add_int(0, 2, 3)
                .return_value(0);
        })
    }

    #[test]
    fn test_interfering_values_get_distinct_registers() {
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let method = products();
        let mut code = ir(&method);
        let allocation = LinearScanAllocator::new(&options, &events)
            .assign(&mut code, 2)
            .unwrap();
        allocation.verify().unwrap();

        // arguments stay in their incoming registers
        for (_, op) in code.instructions() {
            if let IrOp::Argument { dest, index } = op {
                let piece = allocation.pieces(*dest).next().unwrap();
                assert_eq!(piece.register, Some(*index));
            }
        }
        assert_eq!(allocation.registers(), 3);
    }

    #[test]
    fn test_register_pressure() {
        let options = CompilerOptions {
            max_registers: 2,
            ..CompilerOptions::default()
        };
        let error = allocate(&products(), &options).unwrap_err();
        assert!(matches!(error, Error::RegisterPressure { limit: 2, .. }));
    }

    #[test]
    fn test_dead_definition_rejected() {
        let method = method_from("p.A.f()int", 2, |asm| {
            asm.const_int(1, 7).const_int(0, 1).return_value(0);
        });
        let error = allocate(&method, &CompilerOptions::default()).unwrap_err();
        assert!(matches!(error, Error::InvariantViolation { .. }));
    }

    #[test]
    fn test_landing_pads_for_shared_handler() {
        let g = MethodId::parse("p.A.g(int)void").unwrap();
        let method = method_from("p.A.f(int)int", 2, |asm| {
            let start = asm.new_label();
            let end = asm.new_label();
            let handler = asm.new_label();
            asm.bind(start)
                .invoke_static(g.clone(), &[0])
                .invoke_static(g.clone(), &[0])
                .bind(end)
                .return_value(0)
                .bind(handler)
                .move_exception(1)
                .throw(1)
                .try_range(start, end, &[(Some(TypeName::new("java.lang.Exception")), handler)]);
        });
        let mut code = ir(&method);
        let blocks = code.block_count();
        assert_eq!(insert_landing_pads(&mut code), 2);
        assert_eq!(code.block_count(), blocks + 2);
        code.verify_ssa().unwrap();

        let options = CompilerOptions {
            verify_ssa: true,
            ..CompilerOptions::default()
        };
        let allocated = allocate(&method, &options).unwrap();
        let exceptions = allocated
            .instructions()
            .filter(|op| matches!(op, IrOp::MoveException { .. }))
            .count();
        assert_eq!(exceptions, 2);
        for block in &allocated.blocks {
            for (index, op) in block.instructions.iter().enumerate() {
                if matches!(op, IrOp::MoveException { .. }) {
                    assert_eq!(index, 0, "{allocated}");
                }
            }
        }
    }

    fn fibonacci() -> EncodedMethod {
        // a = 0; b = 1; while (n != 0) { t = a + b; a = b; b = t; n-- } return a
        method_from("p.A.fib(int)int", 5, |asm| {
            let head = asm.new_label();
            let done = asm.new_label();
            asm.const_int(1, 0)
                .const_int(2, 1)
                .bind(head)
                .if_zero(crate::program::IfCond::Eq, 0, done)
                .add_int(3, 1, 2)
                .move_reg(1, 2)
                .move_reg(2, 3)
                .const_int(4, -1)
                .add_int(0, 0, 4)
                .goto(head)
                .bind(done)
                .return_value(1);
        })
    }

    #[test]
    fn test_edge_moves_reuse_a_free_register() {
        let options = CompilerOptions {
            max_registers: 5,
            ..CompilerOptions::default()
        };
        let allocated = allocate(&fibonacci(), &options).unwrap();
        assert!(allocated.registers <= 5);

        let mut program = program_with(vec![fibonacci()]);
        crate::compiler::Converter::new(options)
            .unwrap()
            .optimize(&mut program)
            .unwrap();
        let code = program
            .method(&MethodId::parse("p.A.fib(int)int").unwrap())
            .unwrap()
            .code
            .as_ref()
            .unwrap();
        assert!(code.registers <= 5);
        assert_eq!(
            Interpreter::new(&program).run("p.A.fib(int)int", &[Value::Int(10)]),
            Ok(Value::Int(55))
        );
    }

    #[test]
    fn test_free_register_skips_live_and_moved() {
        let options = CompilerOptions::default();
        let events = EventLog::new();
        let method = products();
        let mut code = ir(&method);
        let allocation = LinearScanAllocator::new(&options, &events)
            .assign(&mut code, 2)
            .unwrap();
        assert_eq!(allocation.registers(), 3);
        assert_eq!(allocation.free_register(&[0], &[Move::new(0, 1)]), Some(2));

        // every register is busy while a value of its own is live
        for piece in allocation.intervals() {
            let register = piece.register.unwrap();
            let positions: Vec<u32> = (piece.start()..piece.end())
                .filter(|&p| piece.covers(p))
                .collect();
            if let Some(free) = allocation.free_register(&positions, &[]) {
                assert_ne!(free, register);
            }
        }
    }

    #[test]
    fn test_swap_in_loop_is_resolved() {
        // while (n != 0) { t = a; a = b; b = t; n-- } return a
        let method = method_from("p.A.f(int,int,int)int", 4, |asm| {
            let head = asm.new_label();
            let done = asm.new_label();
            asm.bind(head)
                .if_zero(crate::program::IfCond::Eq, 2, done)
                .move_reg(3, 0)
                .move_reg(0, 1)
                .move_reg(1, 3)
                .const_int(3, -1)
                .add_int(2, 2, 3)
                .goto(head)
                .bind(done)
                .return_value(0);
        });
        let options = CompilerOptions {
            verify_ssa: true,
            ..CompilerOptions::default()
        };
        let allocated = allocate(&method, &options).unwrap();
        assert!(allocated.registers >= 3);
        assert!(allocated
            .instructions()
            .all(|op| !matches!(op, IrOp::Argument { .. })));
    }
}
