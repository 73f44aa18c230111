//! Block level liveness.
//!
//! Backward data-flow over the CFG: a value is live-in to a block if it is used before being
//! defined there, or live-out and not defined there. Phi operands are uses at the end of the
//! matching predecessor, not in the phi's block.

use crate::{
    analysis::ir::{BlockId, IrCode},
    utils::BitSet,
};

/// Live-in and live-out sets per block.
#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: Vec<BitSet>,
    live_out: Vec<BitSet>,
}

impl Liveness {
    /// Computes liveness for `code`.
    #[must_use]
    pub fn compute(code: &IrCode) -> Self {
        let n = code.block_count();
        let values = code.value_count();

        // gen: used before defined; kill: defined (phis included)
        let mut gen = vec![BitSet::new(values); n];
        let mut kill = vec![BitSet::new(values); n];
        for b in code.block_ids() {
            let block = code.block(b);
            for phi in &block.phis {
                kill[b.index()].insert(phi.dest.index());
            }
            for op in &block.instructions {
                op.for_each_use(|v| {
                    if !kill[b.index()].contains(v.index()) {
                        gen[b.index()].insert(v.index());
                    }
                });
                if let Some(dest) = op.dest() {
                    kill[b.index()].insert(dest.index());
                }
            }
        }

        // phi operands flowing out of each predecessor
        let mut phi_out = vec![BitSet::new(values); n];
        for b in code.block_ids() {
            let block = code.block(b);
            for phi in &block.phis {
                for (k, operand) in phi.operands.iter().enumerate() {
                    phi_out[block.predecessors[k].index()].insert(operand.index());
                }
            }
        }

        let mut live_in = gen.clone();
        let mut live_out = phi_out.clone();
        let order: Vec<BlockId> = code.reverse_postorder().into_iter().rev().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &b in &order {
                let mut out = phi_out[b.index()].clone();
                for succ in code.successors_of(b) {
                    out.union_with(&live_in[succ.index()]);
                }
                let mut input = out.clone();
                input.difference_with(&kill[b.index()]);
                input.union_with(&gen[b.index()]);
                if live_in[b.index()].union_with(&input) {
                    changed = true;
                }
                if live_out[b.index()].union_with(&out) {
                    changed = true;
                }
            }
        }

        Self { live_in, live_out }
    }

    /// Returns the values live on entry to `block`, phi results excluded.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> &BitSet {
        &self.live_in[block.index()]
    }

    /// Returns the values live on exit from `block`, phi operands of successors included.
    #[must_use]
    pub fn live_out(&self, block: BlockId) -> &BitSet {
        &self.live_out[block.index()]
    }
}
