//! Parallel moves.
//!
//! Resolution produces sets of register copies that must behave as if they all read their
//! sources before any of them writes. [`sequentialize`] orders them so that no source is
//! overwritten before it is read, breaking cycles through a scratch register.

use crate::program::Reg;

/// A register copy `dest <- src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    /// Destination register
    pub dest: Reg,
    /// Source register
    pub src: Reg,
}

impl Move {
    /// Creates a copy.
    #[must_use]
    pub fn new(dest: Reg, src: Reg) -> Self {
        Self { dest, src }
    }
}

/// Orders a parallel move. Self-moves are dropped; `scratch` is used only when the copies
/// form a cycle. Destinations must be distinct.
#[must_use]
pub fn sequentialize(moves: &[Move], scratch: Reg) -> Vec<Move> {
    let mut pending: Vec<Move> = moves.iter().copied().filter(|m| m.dest != m.src).collect();
    let mut result = Vec::with_capacity(pending.len() + 1);
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|m| !pending.iter().any(|other| other.src == m.dest));
        match ready {
            Some(index) => result.push(pending.remove(index)),
            None => {
                // every destination is still read: park one source in the scratch register
                let blocked = pending[0].src;
                result.push(Move::new(scratch, blocked));
                for m in &mut pending {
                    if m.src == blocked {
                        m.src = scratch;
                    }
                }
            }
        }
    }
    result
}

/// Returns `true` if ordering `moves` needs the scratch register.
#[must_use]
pub fn needs_scratch(moves: &[Move]) -> bool {
    let marker = Reg::MAX;
    sequentialize(moves, marker)
        .iter()
        .any(|m| m.dest == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulate(moves: &[Move], registers: &mut [i32]) {
        for m in moves {
            registers[usize::from(m.dest)] = registers[usize::from(m.src)];
        }
    }

    #[test]
    fn test_chain_is_ordered() {
        // r1 <- r0, r2 <- r1
        let moves = [Move::new(1, 0), Move::new(2, 1)];
        let ordered = sequentialize(&moves, 9);
        let mut registers = [10, 11, 12, 0, 0, 0, 0, 0, 0, 0];
        simulate(&ordered, &mut registers);
        assert_eq!(&registers[..3], &[10, 10, 11]);
        assert!(!needs_scratch(&moves));
    }

    #[test]
    fn test_swap_uses_scratch() {
        let moves = [Move::new(0, 1), Move::new(1, 0)];
        let ordered = sequentialize(&moves, 3);
        assert_eq!(ordered.len(), 3);
        let mut registers = [5, 7, 0, 0];
        simulate(&ordered, &mut registers);
        assert_eq!(&registers[..2], &[7, 5]);
        assert!(needs_scratch(&moves));
    }

    #[test]
    fn test_rotation_with_fanout() {
        // r0 <- r2, r1 <- r0, r2 <- r1, r3 <- r0
        let moves = [
            Move::new(0, 2),
            Move::new(1, 0),
            Move::new(2, 1),
            Move::new(3, 0),
        ];
        let ordered = sequentialize(&moves, 4);
        let mut registers = [1, 2, 3, 0, 0];
        simulate(&ordered, &mut registers);
        assert_eq!(&registers[..4], &[3, 1, 2, 1]);
    }

    #[test]
    fn test_self_moves_dropped() {
        assert!(sequentialize(&[Move::new(2, 2)], 5).is_empty());
    }
}
