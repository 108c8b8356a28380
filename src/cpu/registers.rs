//! Duck Machine register file.
//!
//! The machine has 16 word-sized registers:
//! - r0: the zero register, always reads 0 and discards writes
//! - r1-r14: plain storage cells
//! - r15: the program counter, read and written by the execution loop

use crate::cpu::Word;
use serde::{Deserialize, Serialize};

/// Number of registers in the file.
pub const NUM_REGISTERS: usize = 16;

/// Index of the zero register.
pub const ZERO_REG: usize = 0;

/// Index of the program counter.
pub const PC_REG: usize = 15;

/// The Duck Machine register file.
///
/// Indices are not range-checked here; the instruction format guarantees
/// every decoded register field lies in 0-15.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterFile {
    cells: [Word; NUM_REGISTERS],
}

impl RegisterFile {
    /// Create a new register file with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: [0; NUM_REGISTERS],
        }
    }

    /// Read a register. The zero register always reads 0.
    #[inline]
    pub fn get(&self, index: usize) -> Word {
        self.cells[index]
    }

    /// Write a register. Writes to the zero register are silently discarded.
    #[inline]
    pub fn put(&mut self, index: usize, value: Word) {
        if index != ZERO_REG {
            self.cells[index] = value;
        }
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        self.cells = [0; NUM_REGISTERS];
    }

    /// Current program counter value.
    #[inline]
    pub fn pc(&self) -> Word {
        self.cells[PC_REG]
    }

    /// Set the program counter to an absolute address.
    #[inline]
    pub fn set_pc(&mut self, addr: Word) {
        self.cells[PC_REG] = addr;
    }

    /// Copy of all register values, for trace events and display.
    pub fn snapshot(&self) -> [Word; NUM_REGISTERS] {
        self.cells
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_register_reads_zero() {
        let mut regs = RegisterFile::new();
        regs.put(ZERO_REG, 42);
        assert_eq!(regs.get(ZERO_REG), 0);
    }

    #[test]
    fn test_plain_registers_hold_values() {
        let mut regs = RegisterFile::new();
        regs.put(3, -17);
        regs.put(14, Word::MAX);
        assert_eq!(regs.get(3), -17);
        assert_eq!(regs.get(14), Word::MAX);
    }

    #[test]
    fn test_pc_helpers() {
        let mut regs = RegisterFile::new();
        regs.set_pc(10);
        assert_eq!(regs.pc(), 10);
        assert_eq!(regs.get(PC_REG), 10);

        // The PC is an ordinary cell as far as put/get are concerned.
        regs.put(PC_REG, 77);
        assert_eq!(regs.pc(), 77);
    }

    #[test]
    fn test_reset() {
        let mut regs = RegisterFile::new();
        regs.put(5, 99);
        regs.set_pc(40);
        regs.reset();
        assert_eq!(regs.get(5), 0);
        assert_eq!(regs.pc(), 0);
    }

    proptest! {
        #[test]
        fn prop_put_then_get(index in 1usize..NUM_REGISTERS, value in any::<Word>()) {
            let mut regs = RegisterFile::new();
            regs.put(index, value);
            prop_assert_eq!(regs.get(index), value);
        }

        #[test]
        fn prop_zero_register_absorbs_writes(value in any::<Word>()) {
            let mut regs = RegisterFile::new();
            regs.put(ZERO_REG, value);
            prop_assert_eq!(regs.get(ZERO_REG), 0);
        }
    }
}
