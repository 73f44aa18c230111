//! The IR of one method.

use std::{collections::HashMap, fmt};

use crate::{
    analysis::ir::{BasicBlock, BlockId, IrOp, ValueId},
    program::{MethodId, ValueType},
    utils::graph::{compute_dominators, reverse_postorder, DominatorTree, NodeId, Successors},
    Result,
};

/// Where a value is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    /// A phi of the block
    Phi(BlockId),
    /// Instruction `index` of the block
    Instruction(BlockId, usize),
}

impl DefSite {
    /// Returns the defining block.
    #[must_use]
    pub fn block(self) -> BlockId {
        match self {
            DefSite::Phi(block) | DefSite::Instruction(block, _) => block,
        }
    }
}

/// The control flow graph and values of one method.
///
/// Blocks live in a dense arena; [`BlockId::ENTRY`] is the entry block, which has no
/// predecessors and starts with the `Argument` instructions. Values are dense as well and carry
/// their [`ValueType`].
///
/// While [`IrCode::is_consistent_ssa`] holds, [`IrCode::verify_ssa`] must succeed; every pass
/// of the pipeline preserves this. Register allocation turns the code into non-SSA form.
#[derive(Debug, Clone)]
pub struct IrCode {
    method: MethodId,
    blocks: Vec<BasicBlock>,
    values: Vec<ValueType>,
    consistent_ssa: bool,
}

impl IrCode {
    /// Creates code for `method` consisting of an empty entry block.
    #[must_use]
    pub fn new(method: MethodId) -> Self {
        Self {
            method,
            blocks: vec![BasicBlock::default()],
            values: Vec::new(),
            consistent_ssa: true,
        }
    }

    /// Returns the method this code belongs to.
    #[must_use]
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// Returns `true` while the code is tagged as consistent SSA.
    #[must_use]
    pub fn is_consistent_ssa(&self) -> bool {
        self.consistent_ssa
    }

    /// Drops the SSA tag; done by the register allocator.
    pub fn mark_non_ssa(&mut self) {
        self.consistent_ssa = false;
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns all blocks indexed by [`BlockId`].
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Returns all block ids in arena order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId::new)
    }

    /// Returns a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Returns a block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Appends an empty block.
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        BlockId::new(self.blocks.len() - 1)
    }

    /// Creates a new value of type `ty`.
    pub fn new_value(&mut self, ty: ValueType) -> ValueId {
        self.values.push(ty);
        ValueId::new(self.values.len() - 1)
    }

    /// Returns the number of values ever created.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the type of a value.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> ValueType {
        self.values
            .get(value.index())
            .copied()
            .unwrap_or(ValueType::Reference)
    }

    /// Changes the type of a value.
    pub fn set_value_type(&mut self, value: ValueId, ty: ValueType) {
        self.values[value.index()] = ty;
    }

    /// Returns the successors of a block, normal first.
    #[must_use]
    pub fn successors_of(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).successors()
    }

    /// Returns the reachable blocks in reverse postorder.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        reverse_postorder(self, NodeId::new(0))
            .into_iter()
            .map(|n| BlockId::new(n.index()))
            .collect()
    }

    /// Computes the dominator tree. Node ids equal block indices.
    #[must_use]
    pub fn dominator_tree(&self) -> DominatorTree {
        compute_dominators(self, NodeId::new(0))
    }

    /// Returns the number of instructions, excluding arguments, debug markers and gotos.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|op| {
                !matches!(
                    op,
                    IrOp::Argument { .. } | IrOp::Position { .. } | IrOp::Goto { .. }
                )
            })
            .count()
    }

    /// Iterates all instructions with their block.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, &IrOp)> {
        self.blocks
            .iter()
            .enumerate()
            .flat_map(|(i, b)| b.instructions.iter().map(move |op| (BlockId::new(i), op)))
    }

    /// Returns the definition site of every value, `None` for values without one.
    #[must_use]
    pub fn definitions(&self) -> Vec<Option<DefSite>> {
        let mut defs = vec![None; self.values.len()];
        for (b, block) in self.blocks.iter().enumerate() {
            let block_id = BlockId::new(b);
            for phi in &block.phis {
                defs[phi.dest.index()] = Some(DefSite::Phi(block_id));
            }
            for (i, op) in block.instructions.iter().enumerate() {
                if let Some(dest) = op.dest() {
                    defs[dest.index()] = Some(DefSite::Instruction(block_id, i));
                }
            }
        }
        defs
    }

    /// Returns the number of uses of every value, phi operands included.
    #[must_use]
    pub fn use_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.values.len()];
        for block in &self.blocks {
            for phi in &block.phis {
                for operand in &phi.operands {
                    counts[operand.index()] += 1;
                }
            }
            for op in &block.instructions {
                op.for_each_use(|v| counts[v.index()] += 1);
            }
        }
        counts
    }

    /// Replaces every use of `old` by `new`. Returns the number of replaced uses.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) -> usize {
        let mut map = HashMap::new();
        map.insert(old, new);
        self.replace_uses_with(&map)
    }

    /// Replaces every use of a key of `map` by the mapped value, following chains.
    pub fn replace_uses_with(&mut self, map: &HashMap<ValueId, ValueId>) -> usize {
        if map.is_empty() {
            return 0;
        }
        let resolve = |mut v: ValueId| {
            let mut steps = 0;
            while let Some(&next) = map.get(&v) {
                if next == v || steps > map.len() {
                    break;
                }
                v = next;
                steps += 1;
            }
            v
        };
        let mut replaced = 0;
        for block in &mut self.blocks {
            for phi in &mut block.phis {
                for operand in &mut phi.operands {
                    let target = resolve(*operand);
                    if target != *operand {
                        *operand = target;
                        replaced += 1;
                    }
                }
            }
            for op in &mut block.instructions {
                op.for_each_use_mut(|v| {
                    let target = resolve(*v);
                    if target != *v {
                        *v = target;
                        replaced += 1;
                    }
                });
            }
        }
        replaced
    }

    /// Removes `pred` from the predecessors of `block`, dropping the matching phi operands.
    pub fn remove_predecessor(&mut self, block: BlockId, pred: BlockId) {
        let block = self.block_mut(block);
        if let Some(index) = block.predecessor_index(pred) {
            block.predecessors.remove(index);
            for phi in &mut block.phis {
                phi.operands.remove(index);
            }
        }
    }

    /// Redirects the normal edge `from -> old` to `from -> new`, keeping phi operands of `old`
    /// untouched. The caller is responsible for the predecessor list of `new`.
    pub fn retarget_edge(&mut self, from: BlockId, old: BlockId, new: BlockId) {
        if let Some(terminator) = self.block_mut(from).terminator_mut() {
            terminator.map_targets(|t| if t == old { new } else { t });
        }
    }

    /// Inserts an empty block on the normal edge `from -> to` and returns it.
    ///
    /// The new block takes `from`'s place in the predecessor list of `to`, so phi operands stay
    /// valid.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> BlockId {
        let middle = self.add_block();
        self.block_mut(middle).instructions.push(IrOp::Goto { target: to });
        self.block_mut(middle).predecessors.push(from);
        self.retarget_edge(from, to, middle);
        for pred in &mut self.block_mut(to).predecessors {
            if *pred == from {
                *pred = middle;
            }
        }
        middle
    }

    /// Splits every normal edge whose source has several successors and whose target has
    /// several predecessors. Returns the number of inserted blocks.
    pub fn split_critical_edges(&mut self) -> usize {
        let mut critical = Vec::new();
        for from in self.block_ids() {
            let block = self.block(from);
            if block.successors().len() < 2 {
                continue;
            }
            for to in block.normal_successors() {
                if self.block(to).predecessors.len() > 1 && !block.is_exceptional_successor(to) {
                    critical.push((from, to));
                }
            }
        }
        for &(from, to) in &critical {
            self.split_edge(from, to);
        }
        critical.len()
    }

    /// Removes blocks not reachable from the entry and renumbers the rest.
    ///
    /// Returns `true` if any block was removed.
    pub fn remove_unreachable_blocks(&mut self) -> bool {
        let mut reachable = vec![false; self.blocks.len()];
        for block in self.reverse_postorder() {
            reachable[block.index()] = true;
        }
        if reachable.iter().all(|&r| r) {
            return false;
        }

        for b in 0..self.blocks.len() {
            if !reachable[b] {
                continue;
            }
            let dead: Vec<BlockId> = self.blocks[b]
                .predecessors
                .iter()
                .copied()
                .filter(|p| !reachable[p.index()])
                .collect();
            for pred in dead {
                self.remove_predecessor(BlockId::new(b), pred);
            }
        }

        let mut remap = vec![None; self.blocks.len()];
        let mut next = 0usize;
        for (b, &live) in reachable.iter().enumerate() {
            if live {
                remap[b] = Some(BlockId::new(next));
                next += 1;
            }
        }
        let map = |id: BlockId| remap[id.index()].unwrap_or(id);

        let old = std::mem::take(&mut self.blocks);
        for (b, mut block) in old.into_iter().enumerate() {
            if !reachable[b] {
                continue;
            }
            for pred in &mut block.predecessors {
                *pred = map(*pred);
            }
            for handler in &mut block.catch_handlers {
                handler.target = map(handler.target);
            }
            if let Some(terminator) = block.terminator_mut() {
                terminator.map_targets(map);
            }
            self.blocks.push(block);
        }
        true
    }

    /// Checks the SSA invariants.
    ///
    /// - every block is reachable and ends with its only terminator;
    /// - the entry block has no predecessors, and `Argument`s appear only at its start;
    /// - predecessor lists mirror successor edges, each edge once;
    /// - phis have one operand per predecessor;
    /// - a block with catch handlers throws at most once, right before its terminator;
    /// - every value is defined once, and every use is dominated by its definition (phi
    ///   operands at the end of the matching predecessor, before the throwing instruction for
    ///   exceptional edges).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] describing the first violation found.
    pub fn verify_ssa(&self) -> Result<()> {
        let method = &self.method;
        if !self.block(BlockId::ENTRY).predecessors.is_empty() {
            return Err(invariant_error!("{}: entry block has predecessors", method));
        }

        let tree = self.dominator_tree();
        for b in self.block_ids() {
            if !tree.is_reachable(NodeId::new(b.index())) {
                return Err(invariant_error!("{}: block {} is unreachable", method, b));
            }
            let block = self.block(b);

            match block.instructions.last() {
                Some(last) if last.is_terminator() => {}
                _ => return Err(invariant_error!("{}: block {} has no terminator", method, b)),
            }
            let mut throwing = 0;
            for (i, op) in block.instructions.iter().enumerate() {
                if op.is_terminator() && i + 1 != block.instructions.len() {
                    return Err(invariant_error!(
                        "{}: terminator in the middle of block {}",
                        method,
                        b
                    ));
                }
                if matches!(op, IrOp::Argument { .. })
                    && (b != BlockId::ENTRY
                        || block.instructions[..i]
                            .iter()
                            .any(|o| !matches!(o, IrOp::Argument { .. })))
                {
                    return Err(invariant_error!("{}: misplaced argument in {}", method, b));
                }
                if matches!(op, IrOp::MoveException { .. })
                    && (i != 0
                        || block.predecessors.is_empty()
                        || block.predecessors.iter().any(|&p| {
                            !self.block(p).is_exceptional_successor(b)
                        }))
                {
                    return Err(invariant_error!(
                        "{}: move-exception in {} is not at the start of a handler",
                        method,
                        b
                    ));
                }
                if op.can_throw() {
                    throwing += 1;
                }
            }
            if !block.catch_handlers.is_empty() {
                let first_throw = block.instructions.iter().position(IrOp::can_throw);
                let last = block.instructions.len() - 1;
                let allowed = match first_throw {
                    None => true,
                    Some(i) => throwing == 1 && (i == last || i + 1 == last),
                };
                if !allowed {
                    return Err(invariant_error!(
                        "{}: block {} with catch handlers throws before its end",
                        method,
                        b
                    ));
                }
            }

            let mut seen = Vec::new();
            for &pred in &block.predecessors {
                if seen.contains(&pred) {
                    return Err(invariant_error!(
                        "{}: duplicate predecessor {} of {}",
                        method,
                        pred,
                        b
                    ));
                }
                seen.push(pred);
                if pred.index() >= self.blocks.len() || !self.successors_of(pred).contains(&b) {
                    return Err(invariant_error!(
                        "{}: {} lists {} as predecessor without an edge",
                        method,
                        b,
                        pred
                    ));
                }
            }
            for succ in block.successors() {
                if succ.index() >= self.blocks.len()
                    || !self.block(succ).predecessors.contains(&b)
                {
                    return Err(invariant_error!(
                        "{}: edge {} -> {} missing from predecessors",
                        method,
                        b,
                        succ
                    ));
                }
            }
            for phi in &block.phis {
                if phi.operands.len() != block.predecessors.len() {
                    return Err(invariant_error!(
                        "{}: phi {} in {} has {} operands for {} predecessors",
                        method,
                        phi.dest,
                        b,
                        phi.operands.len(),
                        block.predecessors.len()
                    ));
                }
            }
        }

        let mut defs: Vec<Option<DefSite>> = vec![None; self.values.len()];
        for b in self.block_ids() {
            let block = self.block(b);
            let phi_defs = block.phis.iter().map(|p| (p.dest, DefSite::Phi(b)));
            let op_defs = block
                .instructions
                .iter()
                .enumerate()
                .filter_map(|(i, op)| op.dest().map(|d| (d, DefSite::Instruction(b, i))));
            for (dest, site) in phi_defs.chain(op_defs) {
                let Some(slot) = defs.get_mut(dest.index()) else {
                    return Err(invariant_error!("{}: unknown value {}", method, dest));
                };
                if slot.is_some() {
                    return Err(invariant_error!("{}: {} defined twice", method, dest));
                }
                *slot = Some(site);
            }
        }

        let node = |b: BlockId| NodeId::new(b.index());
        let check_use = |value: ValueId, block: BlockId, index: Option<usize>| -> Result<()> {
            let Some(Some(site)) = defs.get(value.index()) else {
                return Err(invariant_error!(
                    "{}: {} used in {} but never defined",
                    method,
                    value,
                    block
                ));
            };
            let dominated = match (*site, index) {
                (DefSite::Phi(d), _) => tree.dominates(node(d), node(block)),
                (DefSite::Instruction(d, i), Some(use_index)) if d == block => i < use_index,
                (DefSite::Instruction(d, _), _) => tree.dominates(node(d), node(block)),
            };
            if dominated {
                Ok(())
            } else {
                Err(invariant_error!(
                    "{}: use of {} in {} is not dominated by its definition",
                    method,
                    value,
                    block
                ))
            }
        };

        for b in self.block_ids() {
            let block = self.block(b);
            for phi in &block.phis {
                for (k, &operand) in phi.operands.iter().enumerate() {
                    let pred = block.predecessors[k];
                    let pred_block = self.block(pred);
                    let end = if pred_block.is_exceptional_successor(b) {
                        pred_block
                            .throwing_index()
                            .unwrap_or(pred_block.instructions.len())
                    } else {
                        pred_block.instructions.len()
                    };
                    check_use(operand, pred, Some(end))?;
                }
            }
            for (i, op) in block.instructions.iter().enumerate() {
                let mut result = Ok(());
                op.for_each_use(|v| {
                    if result.is_ok() {
                        result = check_use(v, b, Some(i));
                    }
                });
                result?;
            }
        }
        Ok(())
    }
}

impl Successors for IrCode {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks[node.index()]
            .successors()
            .into_iter()
            .map(|b| NodeId::new(b.index()))
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.method)?;
        for (b, block) in self.blocks.iter().enumerate() {
            write!(f, "B{b}:")?;
            if !block.predecessors.is_empty() {
                let preds: Vec<String> =
                    block.predecessors.iter().map(ToString::to_string).collect();
                write!(f, " preds({})", preds.join(", "))?;
            }
            for handler in &block.catch_handlers {
                match &handler.guard {
                    Some(guard) => write!(f, " catch({guard} -> {})", handler.target)?,
                    None => write!(f, " catch(* -> {})", handler.target)?,
                }
            }
            writeln!(f)?;
            for phi in &block.phis {
                let operands: Vec<String> = phi.operands.iter().map(ToString::to_string).collect();
                writeln!(f, "  {} <- phi({})", phi.dest, operands.join(", "))?;
            }
            for op in &block.instructions {
                writeln!(f, "  {op}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ir::Phi,
        program::{BinaryOp, ConstValue, IfCond, NumericType},
        Error,
    };

    /// B0: v0 = arg; if v0 then B1 else B2; B1/B2 -> B3: v1 = phi; return v1
    fn diamond() -> IrCode {
        let mut code = IrCode::new(MethodId::parse("t.T.m(int)int").unwrap());
        let arg = code.new_value(ValueType::Int);
        let one = code.new_value(ValueType::Int);
        let two = code.new_value(ValueType::Int);
        let phi = code.new_value(ValueType::Int);
        let (b1, b2, b3) = (code.add_block(), code.add_block(), code.add_block());
        code.block_mut(BlockId::ENTRY).instructions = vec![
            IrOp::Argument { dest: arg, index: 0 },
            IrOp::If {
                cond: IfCond::Eq,
                left: arg,
                right: None,
                then_block: b1,
                else_block: b2,
            },
        ];
        code.block_mut(b1).predecessors = vec![BlockId::ENTRY];
        code.block_mut(b1).instructions = vec![
            IrOp::Const {
                dest: one,
                value: ConstValue::Int(1),
            },
            IrOp::Goto { target: b3 },
        ];
        code.block_mut(b2).predecessors = vec![BlockId::ENTRY];
        code.block_mut(b2).instructions = vec![
            IrOp::Const {
                dest: two,
                value: ConstValue::Int(2),
            },
            IrOp::Goto { target: b3 },
        ];
        code.block_mut(b3).predecessors = vec![b1, b2];
        code.block_mut(b3).phis = vec![Phi {
            dest: phi,
            operands: vec![one, two],
        }];
        code.block_mut(b3).instructions = vec![IrOp::Return { value: Some(phi) }];
        code
    }

    #[test]
    fn test_diamond_is_consistent() {
        diamond().verify_ssa().unwrap();
    }

    #[test]
    fn test_use_not_dominated() {
        let mut code = diamond();
        let b3 = BlockId::new(3);
        // Return a value defined only on one branch.
        code.block_mut(b3).instructions = vec![IrOp::Return {
            value: Some(ValueId::new(1)),
        }];
        assert!(matches!(
            code.verify_ssa(),
            Err(Error::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_double_definition() {
        let mut code = diamond();
        code.block_mut(BlockId::new(2)).instructions[0] = IrOp::Const {
            dest: ValueId::new(1),
            value: ConstValue::Int(2),
        };
        assert!(code.verify_ssa().is_err());
    }

    #[test]
    fn test_phi_operand_count() {
        let mut code = diamond();
        code.block_mut(BlockId::new(3)).phis[0].operands.pop();
        assert!(code.verify_ssa().is_err());
    }

    #[test]
    fn test_remove_unreachable_renumbers() {
        let mut code = diamond();
        let b1 = BlockId::new(1);
        let b2 = BlockId::new(2);
        code.block_mut(BlockId::ENTRY).instructions[1] = IrOp::Goto { target: b2 };
        assert!(code.remove_unreachable_blocks());
        assert_eq!(code.block_count(), 3);
        // old B2 is now B1, old B3 is now B2 with a single phi operand
        assert_eq!(code.block(b1).predecessors, vec![BlockId::ENTRY]);
        assert_eq!(code.block(b2).phis[0].operands, vec![ValueId::new(2)]);
        code.verify_ssa().unwrap();
    }

    #[test]
    fn test_split_critical_edges() {
        let mut code = IrCode::new(MethodId::parse("t.T.m(int)void").unwrap());
        let arg = code.new_value(ValueType::Int);
        let exit = code.add_block();
        code.block_mut(BlockId::ENTRY).instructions = vec![
            IrOp::Argument { dest: arg, index: 0 },
            IrOp::If {
                cond: IfCond::Eq,
                left: arg,
                right: None,
                then_block: exit,
                else_block: BlockId::new(2),
            },
        ];
        let other = code.add_block();
        code.block_mut(other).predecessors = vec![BlockId::ENTRY];
        code.block_mut(other).instructions = vec![IrOp::Goto { target: exit }];
        code.block_mut(exit).predecessors = vec![BlockId::ENTRY, other];
        code.block_mut(exit).instructions = vec![IrOp::Return { value: None }];
        code.verify_ssa().unwrap();

        assert_eq!(code.split_critical_edges(), 1);
        code.verify_ssa().unwrap();
        assert_eq!(code.block(exit).predecessors, vec![BlockId::new(3), other]);
    }

    #[test]
    fn test_replace_uses_follows_chains() {
        let mut code = diamond();
        let div = code.new_value(ValueType::Int);
        let b3 = BlockId::new(3);
        code.block_mut(b3).instructions.insert(
            0,
            IrOp::Binary {
                op: BinaryOp::Add,
                ty: NumericType::Int,
                dest: div,
                left: ValueId::new(3),
                right: ValueId::new(3),
            },
        );
        let mut map = HashMap::new();
        map.insert(ValueId::new(3), ValueId::new(0));
        assert_eq!(code.replace_uses_with(&map), 3);
        assert_eq!(code.use_counts()[0], 4);
    }
}
