//! CPU emulation for the virtual machine.
//!
//! This module implements the complete architecture:
//! - 4 KiB of byte-addressable memory
//! - six 8-bit general registers (A–F), inert SS/SP, FLAGS, PC
//! - a 26-opcode instruction set with immediate and memory-indirect
//!   addressing and carry-flag arithmetic

pub mod decode;
pub mod execute;
pub mod memory;
pub mod registers;

pub use decode::{DecodeError, Instruction, Opcode};
pub use execute::{CarryMode, Cpu, CpuError, CpuState};
pub use memory::{Memory, MemoryError, MEMORY_SIZE};
pub use registers::{Reg, Registers, FLAG_CARRY};
