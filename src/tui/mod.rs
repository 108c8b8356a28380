//! TUI debugger for the Duck Machine emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and condition-flag visualization
//! - Memory view
//! - Step/run/breakpoint controls
//! - Disassembly view around the program counter

mod app;
mod ui;

pub use app::{run_debugger, DebuggerApp};
