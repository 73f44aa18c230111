//! The linear scan proper.
//!
//! Intervals are visited by increasing start position. At each start the already allocated
//! intervals are partitioned into *active* (covering the position) and *inactive* (in a hole).
//! A register is chosen for the current interval in this order:
//!
//! 1. a hinted register (the value's own earlier piece, a phi operand or a move source) that
//!    stays free for the whole interval;
//! 2. the lowest register that stays free for the whole interval;
//! 3. a new register, while fewer than the register limit are open;
//! 4. the register that stays free the longest: the interval is split where that register is
//!    needed again and the remainder goes back to the worklist.
//!
//! Pre-coloured intervals are never split and always keep their register.

use std::{cmp::Reverse, collections::BinaryHeap, collections::HashMap};

use crate::{
    analysis::ir::ValueId,
    compiler::regalloc::intervals::LiveInterval,
    program::{MethodId, Reg},
    Error, Result,
};

/// Output of the scan: every interval piece with its register.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Interval pieces; split remainders follow the intervals they were split from
    pub intervals: Vec<LiveInterval>,
    /// Number of registers in use
    pub registers: u16,
    /// Number of splits
    pub splits: usize,
}

/// Linear scan state.
pub struct LinearScan<'a> {
    method: &'a MethodId,
    max_registers: u16,
    hints: &'a HashMap<ValueId, ValueId>,
    intervals: Vec<LiveInterval>,
    active: Vec<usize>,
    inactive: Vec<usize>,
    assigned: HashMap<ValueId, Reg>,
    opened: u16,
    splits: usize,
}

impl<'a> LinearScan<'a> {
    /// Creates a scan over registers `0..max_registers`, the first `ins` of which hold the
    /// pre-coloured intervals.
    #[must_use]
    pub fn new(
        method: &'a MethodId,
        ins: u16,
        max_registers: u16,
        hints: &'a HashMap<ValueId, ValueId>,
    ) -> Self {
        Self {
            method,
            max_registers,
            hints,
            intervals: Vec::new(),
            active: Vec::new(),
            inactive: Vec::new(),
            assigned: HashMap::new(),
            opened: ins,
            splits: 0,
        }
    }

    fn pressure(&self) -> Error {
        Error::RegisterPressure {
            method: self.method.clone(),
            limit: self.max_registers,
        }
    }

    fn register(&self, index: usize) -> Reg {
        self.intervals[index].register.unwrap_or_default()
    }

    fn advance(&mut self, position: u32) {
        let intervals = &self.intervals;
        let mut active = Vec::with_capacity(self.active.len());
        let mut inactive = Vec::with_capacity(self.inactive.len());
        for &index in self.active.iter().chain(&self.inactive) {
            let interval = &intervals[index];
            if interval.end() <= position {
                continue;
            }
            if interval.covers(position) {
                active.push(index);
            } else {
                inactive.push(index);
            }
        }
        self.active = active;
        self.inactive = inactive;
    }

    fn hinted(&self, value: ValueId) -> Vec<Reg> {
        let mut hints = Vec::with_capacity(2);
        if let Some(&register) = self.assigned.get(&value) {
            hints.push(register);
        }
        if let Some(register) = self
            .hints
            .get(&value)
            .and_then(|source| self.assigned.get(source))
        {
            hints.push(*register);
        }
        hints
    }

    /// Allocates `intervals`. `split_position` maps the position where a register is needed
    /// again to the position the current interval may be split at, `None` if no legal split
    /// point exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegisterPressure`] if an interval cannot get a register within the
    /// limit, and [`Error::InvariantViolation`] if a pre-coloured interval lies outside it.
    pub fn run<F>(mut self, intervals: Vec<LiveInterval>, split_position: F) -> Result<ScanResult>
    where
        F: Fn(u32) -> Option<u32>,
    {
        let mut worklist = BinaryHeap::new();
        for interval in intervals.into_iter().filter(|i| !i.is_empty()) {
            let index = self.intervals.len();
            if interval.fixed {
                let register = interval.register.unwrap_or_default();
                if register >= self.opened || register >= self.max_registers {
                    return Err(invariant_error!(
                        "{}: pre-coloured {} outside the argument registers",
                        self.method,
                        interval.value
                    ));
                }
                self.assigned.insert(interval.value, register);
                self.inactive.push(index);
            } else {
                worklist.push(Reverse((interval.start(), interval.value.index(), index)));
            }
            self.intervals.push(interval);
        }
        if self.opened > self.max_registers {
            return Err(self.pressure());
        }

        while let Some(Reverse((position, _, current))) = worklist.pop() {
            self.advance(position);

            let mut free_until = vec![u32::MAX; usize::from(self.opened)];
            for &index in &self.active {
                free_until[usize::from(self.register(index))] = 0;
            }
            for &index in &self.inactive {
                if let Some(at) = self.intervals[index].first_intersection(&self.intervals[current]) {
                    let slot = &mut free_until[usize::from(self.register(index))];
                    *slot = (*slot).min(at);
                }
            }

            let end = self.intervals[current].end();
            let value = self.intervals[current].value;
            let fits = |register: Reg| {
                free_until
                    .get(usize::from(register))
                    .is_some_and(|&until| until >= end)
            };
            let register = if let Some(register) = self.hinted(value).into_iter().find(|&r| fits(r)) {
                register
            } else if let Some(register) = (0..self.opened).find(|&r| fits(r)) {
                register
            } else if self.opened < self.max_registers {
                self.opened += 1;
                self.opened - 1
            } else {
                let (register, until) = free_until
                    .iter()
                    .enumerate()
                    .max_by_key(|&(r, &until)| (until, Reverse(r)))
                    .map(|(r, &until)| (r as Reg, until))
                    .ok_or_else(|| self.pressure())?;
                let split = split_position(until)
                    .filter(|&at| at > position)
                    .ok_or_else(|| self.pressure())?;
                if let Some(rest) = self.intervals[current].split_at(split) {
                    let index = self.intervals.len();
                    worklist.push(Reverse((rest.start(), rest.value.index(), index)));
                    self.intervals.push(rest);
                    self.splits += 1;
                }
                register
            };

            self.intervals[current].register = Some(register);
            self.assigned.entry(value).or_insert(register);
            self.active.push(current);
        }

        Ok(ScanResult {
            intervals: self.intervals,
            registers: self.opened,
            splits: self.splits,
        })
    }
}
