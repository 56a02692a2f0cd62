//! # vCPU Emulator
//!
//! An 8-bit instructional virtual CPU. It loads a binary program image
//! into 4 KiB of memory and runs a fetch-decode-execute loop over a
//! small instruction set: register moves with immediate and
//! memory-indirect addressing, and accumulator arithmetic with a carry
//! flag. The point is to show how a CPU works, not to be fast.

pub mod asm;
pub mod cpu;

// Re-export commonly used types
pub use asm::{assemble, disassemble, load_image, save_image, AssemblerError, ImageError};
pub use cpu::{
    CarryMode, Cpu, CpuError, CpuState, Instruction, Memory, Opcode, Reg, Registers, MEMORY_SIZE,
};
