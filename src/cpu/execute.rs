//! Duck Machine execution engine.
//!
//! Implements the fetch-decode-execute cycle. Every instruction is
//! predicated: its condition mask is tested against the current machine
//! condition, and a failed test suppresses the instruction's effect while
//! the program counter still advances.
//!
//! The engine never raises to its caller. Arithmetic faults, undefined
//! opcodes and out-of-range memory accesses are all absorbed into the
//! `Fault` condition flag and the halted state.

use crate::cpu::alu::Alu;
use crate::cpu::decode::{self, CondFlag, Instruction, Opcode};
use crate::cpu::registers::{RegisterFile, NUM_REGISTERS};
use crate::cpu::{Memory, Word};
use serde::{Deserialize, Serialize};

/// A step-begin trace event.
///
/// Broadcast to listeners after decode and strictly before execution, so
/// observers see the machine as it was when the instruction was fetched.
#[derive(Debug, Clone)]
pub struct CpuStep {
    /// Address the instruction was fetched from.
    pub pc_addr: Word,
    /// Raw instruction word.
    pub instr_word: Word,
    /// Decoded instruction.
    pub instr: Instruction,
    /// Machine condition before execution.
    pub condition: CondFlag,
    /// Register values before execution.
    pub registers: [Word; NUM_REGISTERS],
}

/// Observer notified once per step, before the instruction executes.
pub trait StepListener {
    fn on_step(&mut self, event: &CpuStep);
}

/// Serializable snapshot of the whole machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineState {
    pub registers: [Word; NUM_REGISTERS],
    pub condition: CondFlag,
    pub halted: bool,
    pub steps: u64,
    pub memory: Memory,
}

/// The Duck Machine central processing unit.
///
/// Owns the register file, the arithmetic unit, the current condition flag
/// and the halted flag, plus the bus-attached memory and the registered
/// trace listeners. One CPU per memory; strictly single-threaded.
pub struct Cpu {
    /// CPU registers.
    pub regs: RegisterFile,
    /// Attached main memory.
    pub mem: Memory,
    /// Condition set by the most recent executed instruction.
    pub condition: CondFlag,
    /// Terminal once true; cleared only by a fresh `run`.
    pub halted: bool,
    /// Instructions stepped since construction (for profiling).
    pub steps: u64,
    alu: Alu,
    listeners: Vec<Box<dyn StepListener>>,
}

impl Cpu {
    /// Create a CPU attached to `mem`, with zeroed registers.
    pub fn new(mem: Memory) -> Self {
        Self {
            regs: RegisterFile::new(),
            mem,
            condition: CondFlag::Zero,
            halted: false,
            steps: 0,
            alu: Alu,
            listeners: Vec::new(),
        }
    }

    /// Register a trace listener. Listeners are notified synchronously, in
    /// registration order, before each step executes. Zero listeners is the
    /// normal headless mode.
    pub fn add_listener(&mut self, listener: Box<dyn StepListener>) {
        self.listeners.push(listener);
    }

    /// One fetch-decode-execute step.
    pub fn step(&mut self) {
        self.steps += 1;

        // Fetch: r15 holds the address of the next instruction word.
        let pc_addr = self.regs.pc();
        let instr_word = match self.mem.get(pc_addr) {
            Ok(word) => word,
            Err(_) => {
                // A fetch outside memory is absorbed like any other fault.
                self.fault();
                self.regs.set_pc(pc_addr.wrapping_add(1));
                return;
            }
        };

        // Decode.
        let instr = decode::decode(instr_word);

        // Observers see the machine before the instruction takes effect.
        self.notify(pc_addr, instr_word, instr);

        // Condition test: a mask that misses the current flag suppresses
        // the whole instruction, but the program counter still advances.
        if !instr.cond.intersects(self.condition.mask()) {
            self.regs.set_pc(pc_addr.wrapping_add(1));
            return;
        }

        // Execute.
        let left = self.regs.get(instr.src1);
        let right = self.regs.get(instr.src2).wrapping_add(instr.offset);
        let (result, flag) = self.alu.execute(instr.op, left, right);

        self.condition = flag;
        if flag == CondFlag::Fault {
            self.halted = true;
        }

        // Advance before the write-back, so an instruction targeting r15
        // overwrites the incremented counter and acts as a jump.
        self.regs.set_pc(pc_addr.wrapping_add(1));

        match instr.op {
            Opcode::Halt => self.halted = true,
            Opcode::Load => match self.mem.get(result) {
                Ok(value) => self.regs.put(instr.target, value),
                Err(_) => self.fault(),
            },
            Opcode::Store => {
                let value = self.regs.get(instr.target);
                if self.mem.put(result, value).is_err() {
                    self.fault();
                }
            }
            _ => self.regs.put(instr.target, result),
        }
    }

    /// Run from `from_addr` until the machine halts.
    ///
    /// Clears the halted flag, sets the program counter, then steps until a
    /// HALT executes or a fault occurs. Returns the number of steps taken.
    pub fn run(&mut self, from_addr: Word) -> u64 {
        self.halted = false;
        self.regs.set_pc(from_addr);

        let start = self.steps;
        while !self.halted {
            self.step();
        }
        self.steps - start
    }

    /// Run from `from_addr` for at most `max_steps` instructions.
    pub fn run_limited(&mut self, from_addr: Word, max_steps: u64) -> u64 {
        self.halted = false;
        self.regs.set_pc(from_addr);

        let start = self.steps;
        while !self.halted && self.steps - start < max_steps {
            self.step();
        }
        self.steps - start
    }

    /// Check if the CPU has halted.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Check if the CPU can keep stepping.
    pub fn is_running(&self) -> bool {
        !self.halted
    }

    /// Snapshot the whole machine for serialization.
    pub fn snapshot(&self) -> MachineState {
        MachineState {
            registers: self.regs.snapshot(),
            condition: self.condition,
            halted: self.halted,
            steps: self.steps,
            memory: self.mem.clone(),
        }
    }

    fn fault(&mut self) {
        self.condition = CondFlag::Fault;
        self.halted = true;
    }

    fn notify(&mut self, pc_addr: Word, instr_word: Word, instr: Instruction) {
        if self.listeners.is_empty() {
            return;
        }

        let event = CpuStep {
            pc_addr,
            instr_word,
            instr,
            condition: self.condition,
            registers: self.regs.snapshot(),
        };

        for listener in &mut self.listeners {
            listener.on_step(&event);
        }
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("condition", &self.condition)
            .field("halted", &self.halted)
            .field("steps", &self.steps)
            .field("regs", &self.regs)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{encode, CondMask};
    use crate::cpu::registers::PC_REG;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn word(op: Opcode, cond: CondMask, target: usize, src1: usize, src2: usize, offset: Word) -> Word {
        encode(&Instruction { op, cond, target, src1, src2, offset })
    }

    fn cpu_with_program(words: &[Word]) -> Cpu {
        let mut mem = Memory::new();
        mem.load_program(0, words).unwrap();
        Cpu::new(mem)
    }

    struct Recorder {
        events: Rc<RefCell<Vec<CpuStep>>>,
    }

    impl StepListener for Recorder {
        fn on_step(&mut self, event: &CpuStep) {
            self.events.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn test_halt_stops_run() {
        let mut cpu = cpu_with_program(&[word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0)]);

        let executed = cpu.run(0);

        assert_eq!(executed, 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc(), 1);
    }

    #[test]
    fn test_add_immediate_end_to_end() {
        // r1 := r0 + r0 + 5, then halt.
        let mut cpu = cpu_with_program(&[
            word(Opcode::Add, CondMask::ALWAYS, 1, 0, 0, 5),
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);

        cpu.run(0);

        assert_eq!(cpu.regs.get(1), 5);
        assert_eq!(cpu.regs.pc(), 2);
        assert!(cpu.halted);
    }

    #[test]
    fn test_store_then_load_roundtrip() {
        // r2 := 42; mem[20] := r2; r3 := mem[20].
        let mut cpu = cpu_with_program(&[
            word(Opcode::Add, CondMask::ALWAYS, 2, 0, 0, 42),
            word(Opcode::Store, CondMask::ALWAYS, 2, 0, 0, 20),
            word(Opcode::Load, CondMask::ALWAYS, 3, 0, 0, 20),
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);

        cpu.run(0);

        assert_eq!(cpu.mem.get(20).unwrap(), 42);
        assert_eq!(cpu.regs.get(3), 42);
    }

    #[test]
    fn test_failed_condition_only_advances_pc() {
        // Current condition is Zero at power-on; a PLUS-masked store must
        // be suppressed entirely except for the PC increment.
        let mut cpu = cpu_with_program(&[word(Opcode::Store, CondMask::PLUS, 1, 0, 0, 9)]);
        cpu.regs.put(1, 42);

        cpu.step();

        assert_eq!(cpu.regs.pc(), 1);
        assert_eq!(cpu.regs.get(1), 42);
        assert_eq!(cpu.mem.get(9).unwrap(), 0);
        assert_eq!(cpu.condition, CondFlag::Zero);
        assert!(!cpu.halted);
    }

    #[test]
    fn test_zero_mask_under_plus_condition_skips() {
        let mut cpu = cpu_with_program(&[
            // Sets condition to Plus.
            word(Opcode::Add, CondMask::ALWAYS, 1, 0, 0, 1),
            // Suppressed: only permitted under Zero.
            word(Opcode::Add, CondMask::ZERO, 2, 0, 0, 9),
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);

        cpu.run(0);

        assert_eq!(cpu.condition, CondFlag::Zero); // Halt's result is 0
        assert_eq!(cpu.regs.get(2), 0);
        assert_eq!(cpu.regs.pc(), 3);
    }

    #[test]
    fn test_predicated_instruction_executes_when_mask_matches() {
        let mut cpu = cpu_with_program(&[
            // r1 := -3, condition becomes Minus.
            word(Opcode::Add, CondMask::ALWAYS, 1, 0, 0, -3),
            // Permitted under Minus or Zero.
            word(Opcode::Add, CondMask::MINUS | CondMask::ZERO, 2, 0, 0, 7),
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);

        cpu.run(0);

        assert_eq!(cpu.regs.get(2), 7);
    }

    #[test]
    fn test_divide_by_zero_faults_and_halts() {
        let mut cpu = cpu_with_program(&[word(Opcode::Div, CondMask::ALWAYS, 1, 0, 0, 0)]);

        let executed = cpu.run(0);

        assert_eq!(executed, 1);
        assert!(cpu.halted);
        assert_eq!(cpu.condition, CondFlag::Fault);
        assert_eq!(cpu.regs.get(1), 0);
    }

    #[test]
    fn test_store_into_pc_is_a_jump() {
        // r15 := 3 jumps over the two zero words (which decode to HALT with
        // an empty mask and are therefore skipped anyway).
        let mut cpu = cpu_with_program(&[
            word(Opcode::Add, CondMask::ALWAYS, PC_REG, 0, 0, 3),
            0,
            0,
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);

        let executed = cpu.run(0);

        assert_eq!(executed, 2);
        assert!(cpu.halted);
        assert_eq!(cpu.regs.pc(), 4);
    }

    #[test]
    fn test_undefined_opcode_faults() {
        let raw = ((0xFu32 << 28) | (0xFu32 << 24)) as Word;
        let mut cpu = cpu_with_program(&[raw]);

        cpu.run(0);

        assert!(cpu.halted);
        assert_eq!(cpu.condition, CondFlag::Fault);
    }

    #[test]
    fn test_fetch_out_of_range_faults() {
        let mut cpu = Cpu::new(Memory::with_capacity(16));

        cpu.run(5000);

        assert!(cpu.halted);
        assert_eq!(cpu.condition, CondFlag::Fault);
        assert_eq!(cpu.regs.pc(), 5001);
    }

    #[test]
    fn test_load_from_bad_address_faults() {
        let mut cpu = cpu_with_program(&[word(Opcode::Load, CondMask::ALWAYS, 1, 0, 0, -5)]);
        cpu.regs.put(1, 42);

        cpu.run(0);

        assert!(cpu.halted);
        assert_eq!(cpu.condition, CondFlag::Fault);
        // The failed load must not touch the target register.
        assert_eq!(cpu.regs.get(1), 42);
    }

    #[test]
    fn test_listeners_see_pre_execution_state() {
        let mut cpu = cpu_with_program(&[
            word(Opcode::Add, CondMask::ALWAYS, 1, 0, 0, 5),
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);
        let events = Rc::new(RefCell::new(Vec::new()));
        cpu.add_listener(Box::new(Recorder { events: Rc::clone(&events) }));

        cpu.run(0);

        let events = events.borrow();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].pc_addr, 0);
        assert_eq!(events[0].instr.op, Opcode::Add);
        assert_eq!(events[0].condition, CondFlag::Zero);
        assert_eq!(events[0].registers[1], 0); // not yet written

        assert_eq!(events[1].pc_addr, 1);
        assert_eq!(events[1].instr.op, Opcode::Halt);
        assert_eq!(events[1].registers[1], 5);
    }

    #[test]
    fn test_run_restarts_a_halted_cpu() {
        let mut cpu = cpu_with_program(&[
            word(Opcode::Add, CondMask::ALWAYS, 1, 1, 0, 1),
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);

        cpu.run(0);
        assert!(cpu.halted);

        cpu.run(0);
        assert!(cpu.halted);
        assert_eq!(cpu.regs.get(1), 2);
    }

    #[test]
    fn test_run_limited_stops_at_budget() {
        // An infinite loop: jump back to address 0 forever.
        let mut cpu = cpu_with_program(&[word(Opcode::Add, CondMask::ALWAYS, PC_REG, 0, 0, 0)]);

        let executed = cpu.run_limited(0, 100);

        assert_eq!(executed, 100);
        assert!(!cpu.halted);
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let mut cpu = cpu_with_program(&[
            word(Opcode::Add, CondMask::ALWAYS, 1, 0, 0, 5),
            word(Opcode::Halt, CondMask::ALWAYS, 0, 0, 0, 0),
        ]);
        cpu.run(0);

        let json = serde_json::to_string(&cpu.snapshot()).unwrap();
        let state: MachineState = serde_json::from_str(&json).unwrap();

        assert_eq!(state.registers[1], 5);
        assert!(state.halted);
        assert_eq!(state.memory.get(0).unwrap(), cpu.mem.get(0).unwrap());
    }
}
