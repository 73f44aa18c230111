//! Cleanup after register allocation.
//!
//! Resolution is local and conservative, so allocated code carries moves that copy a register
//! onto itself or back onto its source, constants reloaded into a register that already holds
//! them, and blocks that only jump elsewhere. The schedule is [`CompilerOptions::peephole_passes`]
//! rounds of goto collapsing followed by the instruction peephole, then one final collapse.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::ir::{BlockId, IrOp},
    compiler::{
        regalloc::{RegisterBlock, RegisterCode},
        CompilerOptions, EventKind, EventLog,
    },
    program::{ConstValue, Reg},
};

/// Drops debug line markers. Returns the number removed.
pub fn remove_positions(code: &mut RegisterCode) -> usize {
    let mut removed = 0;
    for block in &mut code.blocks {
        let before = block.instructions.len();
        block
            .instructions
            .retain(|op| !matches!(op, IrOp::Position { .. }));
        removed += before - block.instructions.len();
    }
    removed
}

fn forward(targets: &HashMap<BlockId, BlockId>, block: BlockId) -> BlockId {
    let mut current = block;
    let mut seen = HashSet::new();
    while let Some(&next) = targets.get(&current) {
        if !seen.insert(current) {
            // a ring of gotos is an infinite loop and stays as it is
            return block;
        }
        current = next;
    }
    current
}

/// Retargets branches and handlers past blocks that only hold a `goto`, then drops blocks
/// that became unreachable. Returns the number of dropped blocks.
pub fn collapse_trivial_gotos(code: &mut RegisterCode) -> usize {
    let targets: HashMap<BlockId, BlockId> = code
        .blocks
        .iter()
        .skip(1)
        .filter_map(|b| b.goto_target().map(|target| (b.id, target)))
        .collect();
    if targets.is_empty() {
        return 0;
    }

    for block in &mut code.blocks {
        if let Some(terminator) = block.instructions.last_mut() {
            terminator.map_targets(|target| forward(&targets, target));
        }
        for handler in &mut block.catch_handlers {
            handler.target = forward(&targets, handler.target);
        }
    }
    remove_unreachable(code)
}

fn remove_unreachable(code: &mut RegisterCode) -> usize {
    let Some(entry) = code.blocks.first().map(|b| b.id) else {
        return 0;
    };
    let index: HashMap<BlockId, &RegisterBlock> = code.blocks.iter().map(|b| (b.id, b)).collect();
    let mut reachable = HashSet::from([entry]);
    let mut worklist = vec![entry];
    while let Some(id) = worklist.pop() {
        let Some(block) = index.get(&id) else {
            continue;
        };
        let normal = block.terminator().map(IrOp::successors).unwrap_or_default();
        for next in normal
            .into_iter()
            .chain(block.catch_handlers.iter().map(|h| h.target))
        {
            if reachable.insert(next) {
                worklist.push(next);
            }
        }
    }
    let before = code.blocks.len();
    code.blocks.retain(|b| reachable.contains(&b.id));
    before - code.blocks.len()
}

/// What registers are known to hold within one block.
#[derive(Default)]
struct Known {
    constants: HashMap<Reg, ConstValue>,
    copies: HashMap<Reg, Reg>,
}

impl Known {
    fn clobber(&mut self, register: Reg) {
        self.constants.remove(&register);
        self.copies.remove(&register);
        self.copies.retain(|_, source| *source != register);
    }

    fn holds_copy(&self, dest: Reg, src: Reg) -> bool {
        self.copies.get(&dest) == Some(&src) || self.copies.get(&src) == Some(&dest)
    }
}

/// Removes self-moves, moves between registers already known to be equal, and constant
/// reloads. Knowledge does not cross block boundaries. Returns the number removed.
pub fn peephole(code: &mut RegisterCode) -> usize {
    let mut removed = 0;
    for block in &mut code.blocks {
        let mut known = Known::default();
        let before = block.instructions.len();
        block.instructions.retain(|op| match op {
            IrOp::Move { dest, src } => {
                let (dest, src) = (RegisterCode::register(*dest), RegisterCode::register(*src));
                if dest == src || known.holds_copy(dest, src) {
                    return false;
                }
                let constant = known.constants.get(&src).cloned();
                known.clobber(dest);
                known.copies.insert(dest, src);
                if let Some(value) = constant {
                    known.constants.insert(dest, value);
                }
                true
            }
            IrOp::Const { dest, value } => {
                let dest = RegisterCode::register(*dest);
                if known.constants.get(&dest) == Some(value) {
                    return false;
                }
                known.clobber(dest);
                known.constants.insert(dest, value.clone());
                true
            }
            other => {
                if let Some(dest) = other.dest() {
                    known.clobber(RegisterCode::register(dest));
                }
                true
            }
        });
        removed += before - block.instructions.len();
    }
    removed
}

/// Runs the cleanup schedule. Returns the number of removed instructions and blocks.
pub fn run(code: &mut RegisterCode, options: &CompilerOptions, events: &EventLog) -> usize {
    let mut removed = 0;
    if !options.debug {
        removed += remove_positions(code);
    }
    for _ in 0..options.peephole_passes {
        removed += collapse_trivial_gotos(code);
        removed += peephole(code);
    }
    removed += collapse_trivial_gotos(code);

    if removed > 0 {
        events
            .record(EventKind::PeepholeApplied)
            .method(code.method.clone())
            .message(format!("{removed} instructions or blocks removed"))
            .pass("peephole");
    }
    removed
}
