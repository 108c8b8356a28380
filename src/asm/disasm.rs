//! Disassembler for Duck Machine programs.
//!
//! Converts object words back to the assembler's syntax.

use crate::cpu::decode::{decode, CondMask, Instruction, Opcode};
use crate::cpu::Word;

/// Disassemble a single word to text.
pub fn disassemble_word(word: Word) -> String {
    let instr = decode(word);
    if instr.op == Opcode::Undefined {
        return format!("??? ; 0x{:08X}", word as u32);
    }
    format_instruction(&instr)
}

/// Disassemble a slice of words, one line per address.
pub fn disassemble(words: &[Word]) -> String {
    let mut output = String::new();
    output.push_str("; Duck Machine disassembly\n");
    output.push_str("; ------------------------\n\n");

    for (addr, word) in words.iter().enumerate() {
        output.push_str(&format!("{:03}: {}\n", addr, disassemble_word(*word)));
    }

    output
}

/// Format a decoded instruction as assembly text.
fn format_instruction(instr: &Instruction) -> String {
    let mnemonic = format!("{}{}", instr.op.mnemonic(), format_cond(instr.cond));
    match instr.op {
        // Halt ignores its register fields.
        Opcode::Halt => mnemonic,
        _ => format!(
            "{} r{},r{},r{}[{}]",
            mnemonic, instr.target, instr.src1, instr.src2, instr.offset
        ),
    }
}

/// Format a condition mask as a predication suffix.
fn format_cond(mask: CondMask) -> String {
    if mask == CondMask::ALWAYS {
        return String::new();
    }
    if mask.is_empty() {
        return "/0".to_string();
    }

    let mut suffix = String::from("/");
    for (flag, letter) in [
        (CondMask::MINUS, 'M'),
        (CondMask::ZERO, 'Z'),
        (CondMask::PLUS, 'P'),
        (CondMask::FAULT, 'V'),
    ] {
        if mask.contains(flag) {
            suffix.push(letter);
        }
    }
    suffix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;
    use crate::cpu::decode::encode;

    #[test]
    fn test_disassemble_halt() {
        let words = assemble("HALT").unwrap();
        assert_eq!(disassemble_word(words[0]), "HALT");
    }

    #[test]
    fn test_disassemble_add() {
        let words = assemble("ADD r1,r2,r3[5]").unwrap();
        assert_eq!(disassemble_word(words[0]), "ADD r1,r2,r3[5]");
    }

    #[test]
    fn test_disassemble_predicated() {
        let words = assemble("STORE/ZP r4,r0,r15[-8]").unwrap();
        assert_eq!(disassemble_word(words[0]), "STORE/ZP r4,r0,r15[-8]");
    }

    #[test]
    fn test_disassemble_undefined() {
        let raw = (0xAu32 << 28) as Word;
        assert!(disassemble_word(raw).starts_with("???"));
    }

    #[test]
    fn test_disassembly_reassembles() {
        let original = assemble("SUB/M r3,r3,r0[2]").unwrap();
        let text = disassemble_word(original[0]);
        assert_eq!(assemble(&text).unwrap(), original);
    }

    #[test]
    fn test_disassemble_listing() {
        let words = vec![
            encode(&decode(0)), // HALT/0
            assemble("NOP").unwrap()[0],
        ];
        let listing = disassemble(&words);
        assert!(listing.contains("000: HALT/0"));
        assert!(listing.contains("001: ADD r0,r0,r0[0]"));
    }
}
