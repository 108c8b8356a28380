//! Assembler and disassembler for Duck Machine programs.
//!
//! This module provides:
//! - A simple two-pass assembler (text → object words)
//! - A disassembler (object words → readable text)
//! - The object-file loader/saver

pub mod assembler;
pub mod disasm;
pub mod objfile;

pub use assembler::{assemble, AssemblerError};
pub use disasm::{disassemble, disassemble_word};
pub use objfile::{load_obj, save_obj, ObjError, ObjFile};
