//! Reference instruction set: fixed 32-bit little-endian words.
//!
//! ```text
//! bits  0..8   opcode
//! bits  8..12  rd
//! bits 12..16  rs
//! bits 16..32  imm16
//! ```

/// Instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Nop = 0x00,
    /// Halt until the next interrupt.
    Halt = 0x01,
    /// `rd = imm16` (zero-extended).
    Movi = 0x02,
    /// Replace the high half of `rd` with `imm16`.
    Movhi = 0x03,
    /// `rd = rs`.
    Mov = 0x04,
    /// `rd = rd + rs` (wrapping).
    Add = 0x05,
    /// `rd = rd - rs` (wrapping).
    Sub = 0x06,
    /// `rd = rd / rs`; faults on zero divisor.
    Div = 0x07,
    /// `rd = rd + sext(imm16)` (wrapping).
    Addi = 0x08,
    /// Relative jump by `sext(imm16)` words.
    Jmp = 0x10,
    /// Relative jump when `rd != 0`.
    Bnz = 0x11,
    /// Relative jump when `rd == 0`.
    Bz = 0x12,
    /// `rd = port[rs]`.
    In = 0x20,
    /// `port[rd] = rs`.
    Out = 0x21,
    /// `rd = mem32[rs]`.
    Load = 0x30,
    /// `mem32[rd] = rs`.
    Store = 0x31,
    /// Enable interrupts.
    Ise = 0x40,
    /// Disable interrupts.
    Icl = 0x41,
    /// Return from an interrupt or exception handler.
    Iret = 0x42,
    /// Debugger breakpoint.
    Brk = 0x43,
}

impl Opcode {
    /// Decodes an opcode byte.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Nop,
            0x01 => Self::Halt,
            0x02 => Self::Movi,
            0x03 => Self::Movhi,
            0x04 => Self::Mov,
            0x05 => Self::Add,
            0x06 => Self::Sub,
            0x07 => Self::Div,
            0x08 => Self::Addi,
            0x10 => Self::Jmp,
            0x11 => Self::Bnz,
            0x12 => Self::Bz,
            0x20 => Self::In,
            0x21 => Self::Out,
            0x30 => Self::Load,
            0x31 => Self::Store,
            0x40 => Self::Ise,
            0x41 => Self::Icl,
            0x42 => Self::Iret,
            0x43 => Self::Brk,
            _ => return None,
        })
    }

    /// Fixed cycle cost of this instruction.
    #[must_use]
    pub const fn cycles(self) -> u32 {
        match self {
            Self::Nop
            | Self::Halt
            | Self::Movi
            | Self::Movhi
            | Self::Mov
            | Self::Add
            | Self::Sub
            | Self::Addi
            | Self::Ise
            | Self::Icl
            | Self::Brk => 1,
            Self::Jmp | Self::Bnz | Self::Bz | Self::Load | Self::Store => 2,
            Self::Div => 3,
            Self::In | Self::Out | Self::Iret => 4,
        }
    }
}

/// Cycles charged for an instruction that faults before retiring.
pub const FAULT_CYCLES: u32 = 1;

/// Decoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Operation.
    pub opcode: Opcode,
    /// Destination register index.
    pub rd: u8,
    /// Source register index.
    pub rs: u8,
    /// Immediate operand.
    pub imm: u16,
}

impl Instruction {
    /// Builds an instruction; register indices are masked to 4 bits.
    #[must_use]
    pub const fn new(opcode: Opcode, rd: u8, rs: u8, imm: u16) -> Self {
        Self {
            opcode,
            rd: rd & 0x0F,
            rs: rs & 0x0F,
            imm,
        }
    }

    /// Encodes to the instruction word.
    #[must_use]
    pub const fn encode(self) -> u32 {
        (self.opcode as u32)
            | ((self.rd as u32) << 8)
            | ((self.rs as u32) << 12)
            | ((self.imm as u32) << 16)
    }

    /// Decodes an instruction word.
    ///
    /// # Errors
    ///
    /// Returns the opcode byte when it names no instruction.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn decode(word: u32) -> Result<Self, u8> {
        let byte = word as u8;
        match Opcode::from_u8(byte) {
            Some(opcode) => Ok(Self {
                opcode,
                rd: ((word >> 8) & 0x0F) as u8,
                rs: ((word >> 12) & 0x0F) as u8,
                imm: (word >> 16) as u16,
            }),
            None => Err(byte),
        }
    }

    /// Immediate sign-extended to 32 bits.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub const fn simm(self) -> u32 {
        self.imm as i16 as i32 as u32
    }
}
