//! Instruction format for the Duck Machine.
//!
//! Every instruction is a single 32-bit word:
//!
//! ```text
//! | 31..28 | 27..24 | 23..20 | 19..16 | 15..12 | 11..0  |
//! | opcode | cond   | target | src1   | src2   | offset |
//! ```
//!
//! The offset is a 12-bit two's-complement constant. Register fields are
//! 4 bits wide, so any decoded register index is in 0-15 by construction.

use crate::cpu::Word;
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const OPCODE_SHIFT: u32 = 28;
const COND_SHIFT: u32 = 24;
const TARGET_SHIFT: u32 = 20;
const SRC1_SHIFT: u32 = 16;
const SRC2_SHIFT: u32 = 12;
const NIBBLE: u32 = 0xF;

/// Width of the signed offset field.
pub const OFFSET_BITS: u32 = 12;
/// Largest representable offset.
pub const OFFSET_MAX: Word = 2047;
/// Smallest representable offset.
pub const OFFSET_MIN: Word = -2048;

/// Operation selected by an instruction.
///
/// `Undefined` stands for every encoding outside the defined set; executing
/// it routes through the arithmetic unit's fault path, so decoding is total
/// over all 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Halt,
    Load,
    Store,
    Add,
    Sub,
    Mul,
    Div,
    Undefined,
}

impl Opcode {
    fn from_nibble(bits: u8) -> Self {
        match bits {
            0 => Opcode::Halt,
            1 => Opcode::Load,
            2 => Opcode::Store,
            3 => Opcode::Add,
            4 => Opcode::Sub,
            5 => Opcode::Mul,
            6 => Opcode::Div,
            _ => Opcode::Undefined,
        }
    }

    fn to_nibble(self) -> u8 {
        match self {
            Opcode::Halt => 0,
            Opcode::Load => 1,
            Opcode::Store => 2,
            Opcode::Add => 3,
            Opcode::Sub => 4,
            Opcode::Mul => 5,
            Opcode::Div => 6,
            // First free slot; undefined encodings do not round-trip.
            Opcode::Undefined => 7,
        }
    }

    /// Assembler mnemonic for this operation.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Halt => "HALT",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Undefined => "???",
        }
    }
}

/// Current machine condition, set by the most recent ALU result.
///
/// Exactly one of these is the CPU's condition at any time. The
/// "always" sentinel lives in [`CondMask`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CondFlag {
    /// Last result was zero.
    Zero,
    /// Last result was negative.
    Minus,
    /// Last result was positive.
    Plus,
    /// Arithmetic fault (overflow, division by zero, undefined opcode).
    Fault,
}

impl CondFlag {
    /// Derive the flag from an ALU result value.
    pub fn from_result(value: Word) -> Self {
        if value == 0 {
            CondFlag::Zero
        } else if value < 0 {
            CondFlag::Minus
        } else {
            CondFlag::Plus
        }
    }

    /// The single-bit mask corresponding to this flag.
    pub fn mask(self) -> CondMask {
        match self {
            CondFlag::Minus => CondMask::MINUS,
            CondFlag::Zero => CondMask::ZERO,
            CondFlag::Plus => CondMask::PLUS,
            CondFlag::Fault => CondMask::FAULT,
        }
    }
}

bitflags! {
    /// Set of condition flags an instruction is permitted to execute under.
    ///
    /// An instruction takes effect only if the mask intersects the CPU's
    /// current flag. `ALWAYS` is the union of all flag bits, so it matches
    /// any machine condition; the empty mask matches none.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CondMask: u8 {
        const MINUS = 0b0001;
        const ZERO  = 0b0010;
        const PLUS  = 0b0100;
        const FAULT = 0b1000;
        const ALWAYS = 0b1111;
    }
}

impl Serialize for CondMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for CondMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(CondMask::from_bits_truncate(bits))
    }
}

/// A decoded instruction.
///
/// Created fresh by [`decode`] at each fetch and discarded after the step
/// that decoded it, apart from being echoed in the step trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub cond: CondMask,
    /// Destination register index (0-15).
    pub target: usize,
    /// First source register index (0-15).
    pub src1: usize,
    /// Second source register index (0-15).
    pub src2: usize,
    /// Signed constant added to the second source operand.
    pub offset: Word,
}

/// Decode a raw instruction word.
///
/// Total over all 32-bit inputs: undefined opcode encodings map to
/// [`Opcode::Undefined`] rather than failing.
pub fn decode(word: Word) -> Instruction {
    let w = word as u32;
    Instruction {
        op: Opcode::from_nibble(((w >> OPCODE_SHIFT) & NIBBLE) as u8),
        cond: CondMask::from_bits_truncate(((w >> COND_SHIFT) & NIBBLE) as u8),
        target: ((w >> TARGET_SHIFT) & NIBBLE) as usize,
        src1: ((w >> SRC1_SHIFT) & NIBBLE) as usize,
        src2: ((w >> SRC2_SHIFT) & NIBBLE) as usize,
        offset: sign_extend_offset(w & 0xFFF),
    }
}

/// Encode an instruction back into a word.
pub fn encode(instr: &Instruction) -> Word {
    let mut w = (instr.op.to_nibble() as u32) << OPCODE_SHIFT;
    w |= (instr.cond.bits() as u32) << COND_SHIFT;
    w |= ((instr.target as u32) & NIBBLE) << TARGET_SHIFT;
    w |= ((instr.src1 as u32) & NIBBLE) << SRC1_SHIFT;
    w |= ((instr.src2 as u32) & NIBBLE) << SRC2_SHIFT;
    w |= (instr.offset as u32) & 0xFFF;
    w as Word
}

fn sign_extend_offset(bits: u32) -> Word {
    ((bits << (32 - OFFSET_BITS)) as i32) >> (32 - OFFSET_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: Opcode, cond: CondMask, target: usize, src1: usize, src2: usize, offset: Word) -> Instruction {
        Instruction { op, cond, target, src1, src2, offset }
    }

    #[test]
    fn test_decode_fields() {
        // ADD always r1 := r2 + r3 + 5
        let word = encode(&instr(Opcode::Add, CondMask::ALWAYS, 1, 2, 3, 5));
        let decoded = decode(word);

        assert_eq!(decoded.op, Opcode::Add);
        assert_eq!(decoded.cond, CondMask::ALWAYS);
        assert_eq!(decoded.target, 1);
        assert_eq!(decoded.src1, 2);
        assert_eq!(decoded.src2, 3);
        assert_eq!(decoded.offset, 5);
    }

    #[test]
    fn test_decode_word_zero() {
        // An all-zero word is a HALT with an empty (never-execute) mask.
        let decoded = decode(0);
        assert_eq!(decoded.op, Opcode::Halt);
        assert!(decoded.cond.is_empty());
        assert_eq!(decoded.offset, 0);
    }

    #[test]
    fn test_offset_sign_extension() {
        for offset in [OFFSET_MIN, -1, 0, 1, OFFSET_MAX] {
            let word = encode(&instr(Opcode::Load, CondMask::ALWAYS, 4, 0, 0, offset));
            assert_eq!(decode(word).offset, offset, "offset {offset} did not survive");
        }
    }

    #[test]
    fn test_roundtrip_all_defined_opcodes() {
        for op in [
            Opcode::Halt,
            Opcode::Load,
            Opcode::Store,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
        ] {
            let original = instr(op, CondMask::ZERO | CondMask::PLUS, 15, 7, 0, -9);
            assert_eq!(decode(encode(&original)), original);
        }
    }

    #[test]
    fn test_undefined_opcodes_decode() {
        // Every opcode nibble outside 0-6 decodes, to Undefined.
        for nibble in 7u32..16 {
            let word = (nibble << OPCODE_SHIFT) as Word;
            assert_eq!(decode(word).op, Opcode::Undefined);
        }
    }

    #[test]
    fn test_register_indices_always_in_range() {
        for word in [Word::MIN, -1, 0, 1, 0x7FFF_FFFF, 0x1234_5678] {
            let decoded = decode(word);
            assert!(decoded.target < 16);
            assert!(decoded.src1 < 16);
            assert!(decoded.src2 < 16);
        }
    }

    #[test]
    fn test_flag_mask_matches_only_itself() {
        let flags = [CondFlag::Zero, CondFlag::Minus, CondFlag::Plus, CondFlag::Fault];
        for flag in flags {
            assert!(CondMask::ALWAYS.intersects(flag.mask()));
            for other in flags {
                assert_eq!(flag.mask().intersects(other.mask()), flag == other);
            }
        }
    }
}
