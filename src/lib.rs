//! # Duck Machine Emulator
//!
//! An instruction-set simulator for the Duck Machine, a minimal 16-register
//! teaching CPU. The machine demonstrates, step by step and observably, how
//! a simple von-Neumann processor executes a program held in an external
//! memory: fetch, decode, condition-gated execute, advance.

pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export commonly used types
pub use cpu::{
    decode, encode, Alu, CondFlag, CondMask, Cpu, CpuStep, Instruction, MachineState, Memory,
    Opcode, RegisterFile, StepListener, Word,
};
pub use asm::{assemble, disassemble, disassemble_word, load_obj, save_obj, AssemblerError, ObjFile};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
