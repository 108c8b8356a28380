//! CPU emulation for the Duck Machine.
//!
//! This module implements the complete Duck Machine architecture:
//! - 16 general-purpose registers (r0 wired to zero, r15 the program counter)
//! - a single ALU producing a result and a condition code
//! - condition-gated (predicated) execution of every instruction
//! - word-addressed external memory reached over a simple bus

pub mod memory;
pub mod registers;
pub mod alu;
pub mod decode;
pub mod execute;

/// Machine word: 32 bits, two's-complement.
pub type Word = i32;

pub use memory::{Memory, MemoryError};
pub use registers::{RegisterFile, NUM_REGISTERS, PC_REG, ZERO_REG};
pub use alu::Alu;
pub use decode::{decode, encode, CondFlag, CondMask, Instruction, Opcode};
pub use execute::{Cpu, CpuStep, MachineState, StepListener};
