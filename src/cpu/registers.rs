//! CPU registers.
//!
//! The register file holds:
//! - A–F: six 8-bit general-purpose registers (A is the accumulator for
//!   all arithmetic)
//! - SS, SP: 16-bit stack segment and stack pointer, declared by the
//!   architecture but untouched by every defined opcode
//! - FLAGS: 16-bit flags register, bit 0 is the carry flag
//! - PC: 16-bit program counter

use serde::{Deserialize, Serialize};

/// Bit 0 of FLAGS: carry out of 8-bit arithmetic.
pub const FLAG_CARRY: u16 = 0x0001;

/// Names of the general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reg {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Reg {
    /// All general-purpose registers in encoding order.
    pub const ALL: [Reg; 6] = [Reg::A, Reg::B, Reg::C, Reg::D, Reg::E, Reg::F];

    /// Encoding index (A = 0 .. F = 5), the offset used by the MOV
    /// opcode groups.
    pub fn index(self) -> u8 {
        match self {
            Reg::A => 0,
            Reg::B => 1,
            Reg::C => 2,
            Reg::D => 3,
            Reg::E => 4,
            Reg::F => 5,
        }
    }

    /// Register for an encoding index, if in range.
    pub fn from_index(index: u8) -> Option<Reg> {
        Reg::ALL.get(index as usize).copied()
    }

    /// One-letter register name.
    pub fn name(self) -> char {
        match self {
            Reg::A => 'A',
            Reg::B => 'B',
            Reg::C => 'C',
            Reg::D => 'D',
            Reg::E => 'E',
            Reg::F => 'F',
        }
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The register file. Everything starts at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// A: accumulator.
    pub a: u8,
    /// B–F: general-purpose.
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: u8,

    /// SS: stack segment. Inert; no opcode reads or writes it.
    pub ss: u16,
    /// SP: stack pointer. Inert; no opcode reads or writes it.
    pub sp: u16,

    /// FLAGS: bit 0 is carry, all other bits unused.
    pub flags: u16,
    /// PC: address of the next byte to fetch.
    pub pc: u16,
}

impl Registers {
    /// Create a register file with all values zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Read a general-purpose register.
    pub fn get(&self, reg: Reg) -> u8 {
        match reg {
            Reg::A => self.a,
            Reg::B => self.b,
            Reg::C => self.c,
            Reg::D => self.d,
            Reg::E => self.e,
            Reg::F => self.f,
        }
    }

    /// Write a general-purpose register.
    pub fn set(&mut self, reg: Reg, value: u8) {
        match reg {
            Reg::A => self.a = value,
            Reg::B => self.b = value,
            Reg::C => self.c = value,
            Reg::D => self.d = value,
            Reg::E => self.e = value,
            Reg::F => self.f = value,
        }
    }

    /// Advance the program counter by one fetched byte.
    /// Returns the pre-advance value.
    pub fn advance_pc(&mut self) -> u16 {
        let old = self.pc;
        self.pc = self.pc.wrapping_add(1);
        old
    }

    /// Carry flag (bit 0 of FLAGS) as a bool.
    pub fn carry(&self) -> bool {
        self.flags & FLAG_CARRY != 0
    }

    /// Carry flag as a 0/1 byte, the form the add-with-carry opcodes use.
    pub fn carry_bit(&self) -> u8 {
        (self.flags & FLAG_CARRY) as u8
    }

    /// Set the carry flag.
    pub fn set_carry(&mut self) {
        self.flags |= FLAG_CARRY;
    }

    /// Clear the carry flag.
    pub fn clear_carry(&mut self) {
        self.flags &= !FLAG_CARRY;
    }
}
