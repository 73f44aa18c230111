//! Instruction numbering and live intervals.
//!
//! Blocks are laid out in reverse postorder. Every block owns an even start position, where
//! its phis define their values; instruction `i` of the block sits at `from + 2 * (i + 1)`.
//! An instruction at position `p` reads its operands at `p` and writes its result at `p + 1`,
//! so a value whose last use is at `p` and the result of the same instruction may share a
//! register.

use std::fmt;

use crate::{
    analysis::ir::{BlockId, IrCode, Liveness, ValueId},
    program::Reg,
};

/// A half-open range of positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LiveRange {
    /// First covered position
    pub start: u32,
    /// First position after the range
    pub end: u32,
}

impl LiveRange {
    fn intersection(&self, other: &LiveRange) -> Option<u32> {
        let start = self.start.max(other.start);
        (start < self.end.min(other.end)).then_some(start)
    }
}

/// The positions where a value needs a register, possibly with holes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    /// The value
    pub value: ValueId,
    ranges: Vec<LiveRange>,
    /// Assigned register
    pub register: Option<Reg>,
    /// Pre-coloured intervals keep their register and are never split
    pub fixed: bool,
}

impl LiveInterval {
    /// Creates an interval without ranges.
    #[must_use]
    pub fn new(value: ValueId) -> Self {
        Self {
            value,
            ranges: Vec::new(),
            register: None,
            fixed: false,
        }
    }

    /// Creates an interval from explicit ranges.
    #[must_use]
    pub fn with_ranges(value: ValueId, ranges: &[(u32, u32)]) -> Self {
        let mut interval = Self::new(value);
        for &(start, end) in ranges {
            interval.add_range(start, end);
        }
        interval
    }

    /// Returns the ranges in position order.
    #[must_use]
    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    /// Returns `true` if no position is covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the first covered position.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.ranges.first().map_or(0, |r| r.start)
    }

    /// Returns the position after the last covered one.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Adds `[start, end)`, merging with overlapping or adjacent ranges.
    pub fn add_range(&mut self, start: u32, end: u32) {
        if start >= end {
            return;
        }
        let mut merged = LiveRange { start, end };
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if range.end < merged.start || merged.end < range.start {
                kept.push(range);
            } else {
                merged.start = merged.start.min(range.start);
                merged.end = merged.end.max(range.end);
            }
        }
        let at = kept.partition_point(|r| r.start < merged.start);
        kept.insert(at, merged);
        self.ranges = kept;
    }

    /// Moves the start of the first range to the definition at `position`.
    fn define_at(&mut self, position: u32) {
        match self.ranges.first_mut() {
            Some(first) if first.start <= position && position < first.end => {
                first.start = position;
            }
            _ => self.add_range(position, position + 1),
        }
    }

    /// Returns `true` if `position` is covered.
    #[must_use]
    pub fn covers(&self, position: u32) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start <= position && position < r.end)
    }

    /// Returns the first position covered by both intervals.
    #[must_use]
    pub fn first_intersection(&self, other: &LiveInterval) -> Option<u32> {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a, b) = (&self.ranges[i], &other.ranges[j]);
            if let Some(position) = a.intersection(b) {
                return Some(position);
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        None
    }

    /// Splits the interval at `position`; `self` keeps the positions before it.
    ///
    /// Returns `None` if nothing is covered from `position` on.
    pub fn split_at(&mut self, position: u32) -> Option<LiveInterval> {
        let mut rest = Vec::new();
        let mut kept = Vec::new();
        for range in self.ranges.drain(..) {
            if range.end <= position {
                kept.push(range);
            } else if range.start >= position {
                rest.push(range);
            } else {
                kept.push(LiveRange {
                    start: range.start,
                    end: position,
                });
                rest.push(LiveRange {
                    start: position,
                    end: range.end,
                });
            }
        }
        self.ranges = kept;
        if rest.is_empty() {
            return None;
        }
        Some(LiveInterval {
            value: self.value,
            ranges: rest,
            register: None,
            fixed: false,
        })
    }
}

impl fmt::Display for LiveInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        if let Some(register) = self.register {
            write!(f, " r{register}")?;
        }
        for range in &self.ranges {
            write!(f, " [{}, {})", range.start, range.end)?;
        }
        Ok(())
    }
}

/// Linear block order and instruction positions.
#[derive(Debug, Clone)]
pub struct Numbering {
    order: Vec<BlockId>,
    from: Vec<u32>,
    to: Vec<u32>,
}

impl Numbering {
    /// Numbers the blocks of `code` in reverse postorder.
    #[must_use]
    pub fn new(code: &IrCode) -> Self {
        let order = code.reverse_postorder();
        let mut from = vec![0; code.block_count()];
        let mut to = vec![0; code.block_count()];
        let mut position = 0u32;
        for &block in &order {
            from[block.index()] = position;
            position += 2 * (code.block(block).instructions.len() as u32 + 1);
            to[block.index()] = position;
        }
        Self { order, from, to }
    }

    /// Returns the blocks in layout order.
    #[must_use]
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// Returns the position where the phis of `block` are defined.
    #[must_use]
    pub fn block_from(&self, block: BlockId) -> u32 {
        self.from[block.index()]
    }

    /// Returns the position after the last slot of `block`.
    #[must_use]
    pub fn block_to(&self, block: BlockId) -> u32 {
        self.to[block.index()]
    }

    /// Returns the position of instruction `index` of `block`.
    #[must_use]
    pub fn position(&self, block: BlockId, index: usize) -> u32 {
        self.from[block.index()] + 2 * (index as u32 + 1)
    }

    /// Returns the block and instruction index at an even instruction position.
    #[must_use]
    pub fn instruction_at(&self, position: u32) -> Option<(BlockId, usize)> {
        let block = *self
            .order
            .iter()
            .find(|b| self.from[b.index()] < position && position < self.to[b.index()])?;
        let offset = position - self.from[block.index()];
        (offset % 2 == 0).then(|| (block, (offset / 2 - 1) as usize))
    }
}

/// Builds one interval per value, indexed by value index. Values without code positions get
/// empty intervals.
#[must_use]
pub fn build_intervals(
    code: &IrCode,
    numbering: &Numbering,
    liveness: &Liveness,
) -> Vec<LiveInterval> {
    let mut intervals: Vec<LiveInterval> = (0..code.value_count())
        .map(|v| LiveInterval::new(ValueId::new(v)))
        .collect();

    for &block in numbering.order().iter().rev() {
        let from = numbering.block_from(block);
        let to = numbering.block_to(block);
        for value in liveness.live_out(block).iter() {
            intervals[value].add_range(from, to);
        }
        let current = code.block(block);
        for (index, op) in current.instructions.iter().enumerate().rev() {
            let position = numbering.position(block, index);
            if let Some(dest) = op.dest() {
                intervals[dest.index()].define_at(position + 1);
            }
            op.for_each_use(|used| intervals[used.index()].add_range(from, position + 1));
        }
        for phi in &current.phis {
            intervals[phi.dest.index()].define_at(from);
        }
    }
    intervals
}
