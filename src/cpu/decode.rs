//! Instruction decoder.
//!
//! Every instruction is one opcode byte, optionally followed by a single
//! operand byte. The operand is either an immediate value or an address
//! into memory, fixed per opcode. Opcode layout:
//!
//! - `0x00` NOP, `0x01` HLT
//! - `0x02..=0x07` move immediate into A..F
//! - `0x08..=0x0D` load A..F from memory
//! - `0x0E..=0x13` store A..F to memory
//! - `0x14..=0x19` accumulator arithmetic (add/add-with-carry/sub,
//!   immediate and memory forms)
//!
//! Any other byte fetched in opcode position is a decode fault.

use crate::cpu::registers::Reg;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base opcode byte of each group. The MOV groups are indexed by
/// register (A = +0 .. F = +5).
mod op {
    pub const NOP: u8 = 0x00;
    pub const HLT: u8 = 0x01;
    pub const MOV_IMM_BASE: u8 = 0x02;
    pub const MOV_LOAD_BASE: u8 = 0x08;
    pub const MOV_STORE_BASE: u8 = 0x0E;
    pub const ADD_IMM: u8 = 0x14;
    pub const ADC_IMM: u8 = 0x15;
    pub const ADD_MEM: u8 = 0x16;
    pub const ADC_MEM: u8 = 0x17;
    pub const SUB_IMM: u8 = 0x18;
    pub const SUB_MEM: u8 = 0x19;
}

/// A decoded opcode: the operation identity, without its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    /// No operation.
    Nop,
    /// Halt execution.
    Halt,
    /// `reg := operand`
    MovImm(Reg),
    /// `reg := mem[operand]`
    MovLoad(Reg),
    /// `mem[operand] := reg`
    MovStore(Reg),
    /// `A := A + operand`
    AddImm,
    /// `A := A + operand + carry`
    AddCarryImm,
    /// `A := A + mem[operand]`
    AddMem,
    /// `A := A + mem[operand] + carry`
    AddCarryMem,
    /// `A := A - operand`
    SubImm,
    /// `A := A - mem[operand]`
    SubMem,
}

impl Opcode {
    /// Decode an opcode byte. Bytes outside the instruction set are a
    /// decode fault.
    pub fn from_byte(byte: u8) -> Result<Opcode, DecodeError> {
        let opcode = match byte {
            op::NOP => Opcode::Nop,
            op::HLT => Opcode::Halt,
            op::MOV_IMM_BASE..=0x07 => {
                let reg = Reg::from_index(byte - op::MOV_IMM_BASE)
                    .ok_or(DecodeError::UnknownOpcode { byte })?;
                Opcode::MovImm(reg)
            }
            op::MOV_LOAD_BASE..=0x0D => {
                let reg = Reg::from_index(byte - op::MOV_LOAD_BASE)
                    .ok_or(DecodeError::UnknownOpcode { byte })?;
                Opcode::MovLoad(reg)
            }
            op::MOV_STORE_BASE..=0x13 => {
                let reg = Reg::from_index(byte - op::MOV_STORE_BASE)
                    .ok_or(DecodeError::UnknownOpcode { byte })?;
                Opcode::MovStore(reg)
            }
            op::ADD_IMM => Opcode::AddImm,
            op::ADC_IMM => Opcode::AddCarryImm,
            op::ADD_MEM => Opcode::AddMem,
            op::ADC_MEM => Opcode::AddCarryMem,
            op::SUB_IMM => Opcode::SubImm,
            op::SUB_MEM => Opcode::SubMem,
            _ => return Err(DecodeError::UnknownOpcode { byte }),
        };
        Ok(opcode)
    }

    /// Encode back to the opcode byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Nop => op::NOP,
            Opcode::Halt => op::HLT,
            Opcode::MovImm(reg) => op::MOV_IMM_BASE + reg.index(),
            Opcode::MovLoad(reg) => op::MOV_LOAD_BASE + reg.index(),
            Opcode::MovStore(reg) => op::MOV_STORE_BASE + reg.index(),
            Opcode::AddImm => op::ADD_IMM,
            Opcode::AddCarryImm => op::ADC_IMM,
            Opcode::AddMem => op::ADD_MEM,
            Opcode::AddCarryMem => op::ADC_MEM,
            Opcode::SubImm => op::SUB_IMM,
            Opcode::SubMem => op::SUB_MEM,
        }
    }

    /// Number of operand bytes this opcode consumes (0 or 1).
    pub fn arity(self) -> usize {
        match self {
            Opcode::Nop | Opcode::Halt => 0,
            _ => 1,
        }
    }

    /// Every defined opcode, in byte order.
    pub fn all() -> impl Iterator<Item = Opcode> {
        (0x00u8..=0x19).filter_map(|b| Opcode::from_byte(b).ok())
    }
}

/// A fully decoded instruction: opcode plus its operand, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Nop,
    Halt,
    /// `reg := value`
    MovImm { reg: Reg, value: u8 },
    /// `reg := mem[addr]`
    MovLoad { reg: Reg, addr: u8 },
    /// `mem[addr] := reg`
    MovStore { reg: Reg, addr: u8 },
    /// `A := A + value`
    AddImm { value: u8 },
    /// `A := A + value + carry`
    AddCarryImm { value: u8 },
    /// `A := A + mem[addr]`
    AddMem { addr: u8 },
    /// `A := A + mem[addr] + carry`
    AddCarryMem { addr: u8 },
    /// `A := A - value`
    SubImm { value: u8 },
    /// `A := A - mem[addr]`
    SubMem { addr: u8 },
}

impl Instruction {
    /// Combine an opcode with its fetched operand byte. The operand is
    /// ignored for zero-arity opcodes.
    pub fn with_operand(opcode: Opcode, operand: u8) -> Instruction {
        match opcode {
            Opcode::Nop => Instruction::Nop,
            Opcode::Halt => Instruction::Halt,
            Opcode::MovImm(reg) => Instruction::MovImm { reg, value: operand },
            Opcode::MovLoad(reg) => Instruction::MovLoad { reg, addr: operand },
            Opcode::MovStore(reg) => Instruction::MovStore { reg, addr: operand },
            Opcode::AddImm => Instruction::AddImm { value: operand },
            Opcode::AddCarryImm => Instruction::AddCarryImm { value: operand },
            Opcode::AddMem => Instruction::AddMem { addr: operand },
            Opcode::AddCarryMem => Instruction::AddCarryMem { addr: operand },
            Opcode::SubImm => Instruction::SubImm { value: operand },
            Opcode::SubMem => Instruction::SubMem { addr: operand },
        }
    }

    /// The opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match *self {
            Instruction::Nop => Opcode::Nop,
            Instruction::Halt => Opcode::Halt,
            Instruction::MovImm { reg, .. } => Opcode::MovImm(reg),
            Instruction::MovLoad { reg, .. } => Opcode::MovLoad(reg),
            Instruction::MovStore { reg, .. } => Opcode::MovStore(reg),
            Instruction::AddImm { .. } => Opcode::AddImm,
            Instruction::AddCarryImm { .. } => Opcode::AddCarryImm,
            Instruction::AddMem { .. } => Opcode::AddMem,
            Instruction::AddCarryMem { .. } => Opcode::AddCarryMem,
            Instruction::SubImm { .. } => Opcode::SubImm,
            Instruction::SubMem { .. } => Opcode::SubMem,
        }
    }

    /// The operand byte, if the opcode takes one.
    pub fn operand(&self) -> Option<u8> {
        match *self {
            Instruction::Nop | Instruction::Halt => None,
            Instruction::MovImm { value, .. }
            | Instruction::AddImm { value }
            | Instruction::AddCarryImm { value }
            | Instruction::SubImm { value } => Some(value),
            Instruction::MovLoad { addr, .. }
            | Instruction::MovStore { addr, .. }
            | Instruction::AddMem { addr }
            | Instruction::AddCarryMem { addr }
            | Instruction::SubMem { addr } => Some(addr),
        }
    }

    /// Encoded length in bytes (1 or 2).
    pub fn len(&self) -> usize {
        1 + self.opcode().arity()
    }

    /// Append the encoded bytes to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().to_byte());
        if let Some(operand) = self.operand() {
            out.push(operand);
        }
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte:#04X}")]
    UnknownOpcode { byte: u8 },
}
