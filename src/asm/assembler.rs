//! Simple assembler for Duck Machine programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! LABEL:              ; Define a label
//!     ADD r1,r2,r3[5] ; r1 := r2 + r3 + 5
//!     SUB/ZM r1,r1,r0 ; predicated: only under Zero or Minus
//!     LOAD r4,r0,r0[x]
//!     STORE r4,r0,r0[x]
//!     JUMP LABEL      ; pseudo: ADD r15,r0,r0[LABEL]
//!     NOP             ; pseudo: ADD r0,r0,r0
//!     HALT
//!
//!     ORG 50          ; Pad output up to address 50
//! x:  DATA 42         ; Define a data word
//! ```
//!
//! Predication suffixes combine the letters `M`, `Z`, `P`, `V`; no suffix
//! means always-execute, and `/0` never executes.

use crate::cpu::decode::{self, encode, CondMask, Instruction, Opcode, OFFSET_MAX, OFFSET_MIN};
use crate::cpu::Word;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to a list of object words.
pub fn assemble(source: &str) -> Result<Vec<Word>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// Which part of an emitted word a pending label patches.
enum Patch {
    /// The 12-bit offset field of an instruction.
    Offset,
    /// The whole word (a `DATA` value).
    Whole,
}

/// The assembler state.
struct Assembler {
    /// Current address (matches the output length; ORG pads).
    current_addr: Word,
    /// Symbol table (label -> address).
    symbols: HashMap<String, Word>,
    /// Forward references: (output index, label, source line, patch kind).
    pending: Vec<(usize, String, usize, Patch)>,
    /// Output words.
    output: Vec<Word>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            current_addr: 0,
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<Word>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve forward references
        self.resolve_references()?;

        Ok(self.output.clone())
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let line = line.trim();

        if line.is_empty() || line.starts_with(';') {
            return Ok(());
        }

        // Remove inline comments
        let line = if let Some(idx) = line.find(';') {
            line[..idx].trim()
        } else {
            line
        };

        if line.is_empty() {
            return Ok(());
        }

        // Check for label definition
        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if !label.is_empty() {
                self.symbols.insert(label, self.current_addr);
            }

            let rest = line[colon_idx + 1..].trim();
            if !rest.is_empty() {
                return self.process_instruction(rest, line_num);
            }
            return Ok(());
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(());
        }

        let mnemonic = parts[0].to_uppercase();
        // Operands may be written with spaces after the commas.
        let operand: String = parts[1..].concat();
        let operand = if operand.is_empty() { None } else { Some(operand.as_str()) };

        match mnemonic.as_str() {
            // Directives
            "ORG" => {
                let addr = parse_number(
                    operand.ok_or_else(|| AssemblerError::SyntaxError {
                        line: line_num,
                        message: "ORG requires an address".into(),
                    })?,
                )
                .ok_or_else(|| AssemblerError::SyntaxError {
                    line: line_num,
                    message: "ORG address must be a number".into(),
                })?;

                if addr < self.current_addr {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!("ORG {} is behind current address {}", addr, self.current_addr),
                    });
                }
                while self.current_addr < addr {
                    self.emit(0);
                }
            }

            "DAT" | "DATA" => {
                let value = self.parse_value_or_label(
                    operand.ok_or_else(|| AssemblerError::SyntaxError {
                        line: line_num,
                        message: "DATA requires a value".into(),
                    })?,
                    line_num,
                    Patch::Whole,
                )?;
                self.emit(value);
            }

            // Instructions
            _ => {
                let instr = self.parse_instruction(&mnemonic, operand, line_num)?;
                self.emit(encode(&instr));
            }
        }

        Ok(())
    }

    fn parse_instruction(
        &mut self,
        mnemonic: &str,
        operand: Option<&str>,
        line_num: usize,
    ) -> Result<Instruction, AssemblerError> {
        // Split a predication suffix off the mnemonic: "SUB/ZM" -> SUB, Z|M
        let (mnemonic, cond) = match mnemonic.split_once('/') {
            Some((base, flags)) => (base, parse_cond(flags, line_num)?),
            None => (mnemonic, CondMask::ALWAYS),
        };

        let op = match mnemonic {
            "ADD" => Opcode::Add,
            "SUB" => Opcode::Sub,
            "MUL" => Opcode::Mul,
            "DIV" => Opcode::Div,
            "LOAD" | "LD" => Opcode::Load,
            "STORE" | "ST" => Opcode::Store,
            "HALT" | "HLT" => {
                return Ok(Instruction { op: Opcode::Halt, cond, target: 0, src1: 0, src2: 0, offset: 0 });
            }

            // Pseudo-instructions
            "NOP" => {
                return Ok(Instruction { op: Opcode::Add, cond, target: 0, src1: 0, src2: 0, offset: 0 });
            }
            "JUMP" | "JMP" => {
                let addr = self.parse_value_or_label(
                    operand.ok_or_else(|| AssemblerError::SyntaxError {
                        line: line_num,
                        message: "JUMP requires a destination".into(),
                    })?,
                    line_num,
                    Patch::Offset,
                )?;
                return Ok(Instruction {
                    op: Opcode::Add,
                    cond,
                    target: crate::cpu::PC_REG,
                    src1: 0,
                    src2: 0,
                    offset: self.check_offset(addr, line_num)?,
                });
            }

            _ => {
                return Err(AssemblerError::UnknownMnemonic {
                    line: line_num,
                    mnemonic: mnemonic.to_string(),
                })
            }
        };

        let operand = operand.ok_or_else(|| AssemblerError::SyntaxError {
            line: line_num,
            message: format!("{} requires operands", mnemonic),
        })?;
        let (target, src1, src2, offset) = self.parse_operands(operand, line_num)?;

        Ok(Instruction { op, cond, target, src1, src2, offset })
    }

    /// Parse `rT,rS1,rS2` with an optional `[offset]` suffix.
    fn parse_operands(
        &mut self,
        operand: &str,
        line_num: usize,
    ) -> Result<(usize, usize, usize, Word), AssemblerError> {
        let (regs_part, offset_part) = match operand.find('[') {
            Some(idx) => {
                let closing = operand.rfind(']').ok_or_else(|| AssemblerError::SyntaxError {
                    line: line_num,
                    message: "missing ']' after offset".into(),
                })?;
                (&operand[..idx], Some(&operand[idx + 1..closing]))
            }
            None => (operand, None),
        };

        let regs: Vec<&str> = regs_part.split(',').collect();
        if regs.len() != 3 {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("expected target,src1,src2 but found '{}'", regs_part),
            });
        }

        let target = parse_register(regs[0], line_num)?;
        let src1 = parse_register(regs[1], line_num)?;
        let src2 = parse_register(regs[2], line_num)?;

        let offset = match offset_part {
            Some(text) => {
                let value = self.parse_value_or_label(text, line_num, Patch::Offset)?;
                self.check_offset(value, line_num)?
            }
            None => 0,
        };

        Ok((target, src1, src2, offset))
    }

    /// Parse a numeric literal, or register the operand as a pending label
    /// reference resolved in pass 2 (returning 0 as a placeholder).
    fn parse_value_or_label(
        &mut self,
        operand: &str,
        line_num: usize,
        patch: Patch,
    ) -> Result<Word, AssemblerError> {
        let operand = operand.trim();

        if let Some(value) = parse_number(operand) {
            return Ok(value);
        }

        let out_idx = self.output.len();
        self.pending.push((out_idx, operand.to_uppercase(), line_num, patch));
        Ok(0)
    }

    fn check_offset(&self, value: Word, line_num: usize) -> Result<Word, AssemblerError> {
        if !(OFFSET_MIN..=OFFSET_MAX).contains(&value) {
            return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
        }
        Ok(value)
    }

    fn emit(&mut self, word: Word) {
        self.output.push(word);
        self.current_addr += 1;
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (out_idx, label, line_num, patch) in &self.pending {
            let addr = *self.symbols.get(label).ok_or_else(|| AssemblerError::UndefinedLabel {
                line: *line_num,
                label: label.clone(),
            })?;

            match patch {
                Patch::Whole => self.output[*out_idx] = addr,
                Patch::Offset => {
                    if !(OFFSET_MIN..=OFFSET_MAX).contains(&addr) {
                        return Err(AssemblerError::ValueOutOfRange { line: *line_num, value: addr });
                    }
                    let instr = decode::decode(self.output[*out_idx]);
                    self.output[*out_idx] = encode(&Instruction { offset: addr, ..instr });
                }
            }
        }
        Ok(())
    }
}

/// Parse a decimal or `0x` hex literal.
fn parse_number(text: &str) -> Option<Word> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok().map(|v| v as Word);
    }
    text.parse::<Word>().ok()
}

/// Parse a register name `r0`-`r15`.
fn parse_register(text: &str, line_num: usize) -> Result<usize, AssemblerError> {
    let text = text.trim();
    let index = text
        .strip_prefix('r')
        .or_else(|| text.strip_prefix('R'))
        .and_then(|digits| digits.parse::<usize>().ok())
        .filter(|index| *index < crate::cpu::NUM_REGISTERS);

    index.ok_or_else(|| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("invalid register '{}'", text),
    })
}

/// Parse a predication suffix such as `ZM` or `0`.
fn parse_cond(flags: &str, line_num: usize) -> Result<CondMask, AssemblerError> {
    let mut mask = CondMask::empty();
    for c in flags.chars() {
        match c.to_ascii_uppercase() {
            'M' => mask |= CondMask::MINUS,
            'Z' => mask |= CondMask::ZERO,
            'P' => mask |= CondMask::PLUS,
            'V' => mask |= CondMask::FAULT,
            '0' => {}
            _ => {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("unknown condition flag '{}'", c),
                })
            }
        }
    }
    Ok(mask)
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: Word },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::decode;
    use crate::cpu::{Cpu, Memory, PC_REG};

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; Load, add, store
            LOAD r1,r0,r0[10]
            ADD r2,r1,r0[1]
            STORE r2,r0,r0[11]
            HALT
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(words.len(), 4);

        let first = decode(words[0]);
        assert_eq!(first.op, Opcode::Load);
        assert_eq!(first.target, 1);
        assert_eq!(first.offset, 10);
        assert_eq!(first.cond, CondMask::ALWAYS);
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
        START:
            ADD r1,r0,r0[1]
            JUMP END
            NOP
        END:
            HALT
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(words.len(), 4);

        let jump = decode(words[1]);
        assert_eq!(jump.op, Opcode::Add);
        assert_eq!(jump.target, PC_REG);
        assert_eq!(jump.offset, 3);
    }

    #[test]
    fn test_assemble_data() {
        let source = r#"
            DATA 42
            DATA -17
            DATA 0x10
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(words, vec![42, -17, 16]);
    }

    #[test]
    fn test_data_label_reference() {
        let source = r#"
            JUMP start
        value: DATA 7
        start: LOAD r1,r0,r0[value]
            HALT
        "#;

        let words = assemble(source).unwrap();
        let load = decode(words[2]);
        assert_eq!(load.offset, 1); // address of `value`
    }

    #[test]
    fn test_predication_suffix() {
        let words = assemble("SUB/ZM r1,r1,r0[1]").unwrap();
        let instr = decode(words[0]);
        assert_eq!(instr.op, Opcode::Sub);
        assert_eq!(instr.cond, CondMask::ZERO | CondMask::MINUS);

        let never = decode(assemble("NOP/0").unwrap()[0]);
        assert!(never.cond.is_empty());
    }

    #[test]
    fn test_org_pads_output() {
        let source = r#"
            DATA 1
            ORG 4
            DATA 2
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(words, vec![1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_offset_out_of_range() {
        assert!(matches!(
            assemble("ADD r1,r0,r0[4096]"),
            Err(AssemblerError::ValueOutOfRange { value: 4096, .. })
        ));
    }

    #[test]
    fn test_unknown_mnemonic() {
        assert!(matches!(
            assemble("FROB r1,r2,r3"),
            Err(AssemblerError::UnknownMnemonic { .. })
        ));
    }

    #[test]
    fn test_undefined_label() {
        assert!(matches!(
            assemble("JUMP nowhere"),
            Err(AssemblerError::UndefinedLabel { .. })
        ));
    }

    #[test]
    fn test_bad_register() {
        assert!(matches!(
            assemble("ADD r16,r0,r0"),
            Err(AssemblerError::SyntaxError { .. })
        ));
    }

    #[test]
    fn test_assembled_program_runs() {
        // Sum the integers 5..=1 into r1 with a predicated backward jump.
        let source = r#"
            ADD r2,r0,r0[5]     ; counter
        loop:
            ADD r1,r1,r2        ; r1 += r2
            SUB r2,r2,r0[1]     ; r2 -= 1, sets the condition
            JUMP/P loop         ; repeat while positive
            HALT
        "#;

        let words = assemble(source).unwrap();
        let mut mem = Memory::new();
        mem.load_program(0, &words).unwrap();
        let mut cpu = Cpu::new(mem);

        cpu.run(0);

        assert_eq!(cpu.regs.get(1), 15);
        assert_eq!(cpu.regs.get(2), 0);
        assert!(cpu.halted);
    }
}
