//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle: read the opcode byte at PC,
//! advance PC, fetch the operand byte if the opcode takes one (advancing
//! PC again), then apply the opcode semantics. The loop runs until a HLT
//! is fetched or a fault terminates the run.

use crate::cpu::decode::{DecodeError, Instruction, Opcode};
use crate::cpu::memory::MemoryError;
use crate::cpu::{Memory, Registers};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU executed a HLT instruction. Terminal.
    Halted,
    /// CPU hit an unrecoverable fault (bad opcode or bad address). Terminal.
    Faulted,
}

/// Carry flag update policy.
///
/// The original machine never clears carry once it is set, which is
/// unconventional but load-bearing for programs written against it. Both
/// behaviors are offered; the choice is explicit, never silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarryMode {
    /// Carry is set-only: arithmetic may set it, nothing clears it.
    /// Matches existing program images byte-for-byte.
    #[default]
    Sticky,
    /// Every arithmetic opcode recomputes carry, setting or clearing it.
    Conventional,
}

impl std::str::FromStr for CarryMode {
    type Err = ParseCarryModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sticky" => Ok(CarryMode::Sticky),
            "conventional" => Ok(CarryMode::Conventional),
            _ => Err(ParseCarryModeError(s.to_string())),
        }
    }
}

/// Error for an unrecognized carry mode name.
#[derive(Debug, Clone, Error)]
#[error("unknown carry mode {0:?} (expected \"sticky\" or \"conventional\")")]
pub struct ParseCarryModeError(String);

/// The virtual CPU.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instructions executed so far.
    pub cycles: u64,
    /// Carry flag policy.
    pub carry_mode: CarryMode,
    /// Last executed instruction (for tracing).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU with zeroed state and sticky carry semantics.
    pub fn new() -> Self {
        Self::with_carry_mode(CarryMode::Sticky)
    }

    /// Create a new CPU with an explicit carry policy.
    pub fn with_carry_mode(carry_mode: CarryMode) -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            carry_mode,
            last_instr: None,
        }
    }

    /// Reset registers, memory, and state. The carry policy is kept.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Load a program image into memory at address 0.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), MemoryError> {
        self.mem.load_image(image)
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed. On a fault the CPU
    /// moves to [`CpuState::Faulted`] and the error carries the PC and
    /// the offending byte or address.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        match self.fetch_decode_execute() {
            Ok(instr) => {
                self.cycles += 1;
                self.last_instr = Some(instr);
                Ok(instr)
            }
            Err(e) => {
                self.state = CpuState::Faulted;
                Err(e)
            }
        }
    }

    fn fetch_decode_execute(&mut self) -> Result<Instruction, CpuError> {
        // Fetch the opcode byte; PC advances before semantics apply.
        let op_pc = self.regs.pc;
        let byte = self
            .mem
            .read(op_pc)
            .map_err(|source| CpuError::Memory { pc: op_pc, source })?;
        self.regs.advance_pc();

        let opcode = Opcode::from_byte(byte)
            .map_err(|source| CpuError::Decode { pc: op_pc, source })?;

        // Fetch the operand byte, if any, at the already-advanced PC.
        let operand = if opcode.arity() == 1 {
            let pc = self.regs.pc;
            let operand = self
                .mem
                .read(pc)
                .map_err(|source| CpuError::Memory { pc, source })?;
            self.regs.advance_pc();
            operand
        } else {
            0
        };

        let instr = Instruction::with_operand(opcode, operand);
        self.execute(instr)?;
        Ok(instr)
    }

    /// Run until halt or fault. Returns the number of instructions
    /// executed by this call.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Apply the semantics of a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<(), CpuError> {
        match instr {
            Instruction::Nop => {}

            Instruction::Halt => {
                self.state = CpuState::Halted;
            }

            Instruction::MovImm { reg, value } => {
                self.regs.set(reg, value);
            }

            Instruction::MovLoad { reg, addr } => {
                let value = self.read_mem(addr)?;
                self.regs.set(reg, value);
            }

            Instruction::MovStore { reg, addr } => {
                let value = self.regs.get(reg);
                let pc = self.regs.pc;
                self.mem
                    .write(addr as u16, value)
                    .map_err(|source| CpuError::Memory { pc, source })?;
            }

            Instruction::AddImm { value } => {
                self.add_to_a(value, false);
            }

            Instruction::AddCarryImm { value } => {
                self.add_to_a(value, true);
            }

            Instruction::AddMem { addr } => {
                let value = self.read_mem(addr)?;
                self.add_to_a(value, false);
            }

            Instruction::AddCarryMem { addr } => {
                let value = self.read_mem(addr)?;
                self.add_to_a(value, true);
            }

            Instruction::SubImm { value } => {
                self.sub_from_a(value);
            }

            Instruction::SubMem { addr } => {
                let value = self.read_mem(addr)?;
                self.sub_from_a(value);
            }
        }

        Ok(())
    }

    /// `A := A + operand (+ carry)`, 8-bit wraparound. Unsigned overflow
    /// is detected by the wrapped sum being smaller than the original A.
    fn add_to_a(&mut self, operand: u8, with_carry: bool) {
        let a = self.regs.a;
        let carry_in = if with_carry { self.regs.carry_bit() } else { 0 };
        let sum = a.wrapping_add(operand).wrapping_add(carry_in);
        self.update_carry(sum < a);
        self.regs.a = sum;
    }

    /// `A := A - operand`, 8-bit wraparound. Carry records the borrow
    /// (pre-subtraction A smaller than the operand).
    fn sub_from_a(&mut self, operand: u8) {
        let a = self.regs.a;
        self.update_carry(a < operand);
        self.regs.a = a.wrapping_sub(operand);
    }

    fn update_carry(&mut self, overflow: bool) {
        match self.carry_mode {
            CarryMode::Sticky => {
                if overflow {
                    self.regs.set_carry();
                }
            }
            CarryMode::Conventional => {
                if overflow {
                    self.regs.set_carry();
                } else {
                    self.regs.clear_carry();
                }
            }
        }
    }

    /// Memory-indirect operand read.
    fn read_mem(&self, addr: u8) -> Result<u8, CpuError> {
        let pc = self.regs.pc;
        self.mem
            .read(addr as u16)
            .map_err(|source| CpuError::Memory { pc, source })
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU halted cleanly.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Check if the CPU terminated on a fault.
    pub fn is_faulted(&self) -> bool {
        self.state == CpuState::Faulted
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("carry_mode", &self.carry_mode)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that terminate a CPU run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    /// `step` was called after the CPU halted or faulted.
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    /// A fetch or operand access went out of memory bounds.
    #[error("memory fault at PC={pc:#06X}: {source}")]
    Memory { pc: u16, source: MemoryError },

    /// The fetched byte is not a defined opcode.
    #[error("decode fault at PC={pc:#06X}: {source}")]
    Decode { pc: u16, source: DecodeError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::registers::Reg;
    use proptest::prelude::*;

    fn make_program(instructions: &[Instruction]) -> Vec<u8> {
        let mut out = Vec::new();
        for instr in instructions {
            instr.encode_into(&mut out);
        }
        out
    }

    fn run_program(instructions: &[Instruction]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_image(&make_program(instructions)).unwrap();
        cpu.run().unwrap();
        cpu
    }

    #[test]
    fn test_halt_only() {
        let cpu = run_program(&[Instruction::Halt]);

        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 1);
        assert_eq!(cpu.regs.pc, 1);
        for reg in Reg::ALL {
            assert_eq!(cpu.regs.get(reg), 0);
        }
        assert_eq!(cpu.regs.flags, 0);
    }

    #[test]
    fn test_nop_then_halt() {
        let cpu = run_program(&[
            Instruction::Nop,
            Instruction::Nop,
            Instruction::Nop,
            Instruction::Halt,
        ]);

        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 4);
        assert_eq!(cpu.regs.pc, 4);
    }

    #[test]
    fn test_mov_imm_each_register() {
        let cpu = run_program(&[
            Instruction::MovImm { reg: Reg::A, value: 1 },
            Instruction::MovImm { reg: Reg::B, value: 2 },
            Instruction::MovImm { reg: Reg::C, value: 3 },
            Instruction::MovImm { reg: Reg::D, value: 4 },
            Instruction::MovImm { reg: Reg::E, value: 5 },
            Instruction::MovImm { reg: Reg::F, value: 6 },
            Instruction::Halt,
        ]);

        assert_eq!(
            Reg::ALL.map(|r| cpu.regs.get(r)),
            [1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn test_store_then_load_through_memory() {
        // MOV A, #5; MOV [0x10], A; MOV B, [0x10]; HLT
        let cpu = run_program(&[
            Instruction::MovImm { reg: Reg::A, value: 0x05 },
            Instruction::MovStore { reg: Reg::A, addr: 0x10 },
            Instruction::MovLoad { reg: Reg::B, addr: 0x10 },
            Instruction::Halt,
        ]);

        assert_eq!(cpu.regs.b, 0x05);
        assert_eq!(cpu.mem.read(0x10).unwrap(), 0x05);
    }

    #[test]
    fn test_add_mem_and_sub_mem() {
        let mut cpu = Cpu::new();
        cpu.load_image(&make_program(&[
            Instruction::MovImm { reg: Reg::A, value: 10 },
            Instruction::AddMem { addr: 0x20 },
            Instruction::SubMem { addr: 0x21 },
            Instruction::Halt,
        ]))
        .unwrap();
        cpu.mem.write(0x20, 7).unwrap();
        cpu.mem.write(0x21, 3).unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.regs.a, 14);
        assert!(!cpu.regs.carry());
    }

    #[test]
    fn test_add_overflow_sets_carry() {
        let cpu = run_program(&[
            Instruction::MovImm { reg: Reg::A, value: 0xF0 },
            Instruction::AddImm { value: 0x20 },
            Instruction::Halt,
        ]);

        assert_eq!(cpu.regs.a, 0x10);
        assert!(cpu.regs.carry());
    }

    #[test]
    fn test_add_with_carry_consumes_carry_bit() {
        // First add overflows and sets carry; ADC then adds one extra.
        let cpu = run_program(&[
            Instruction::MovImm { reg: Reg::A, value: 0xFF },
            Instruction::AddImm { value: 0x01 },
            Instruction::AddCarryImm { value: 0x10 },
            Instruction::Halt,
        ]);

        assert_eq!(cpu.regs.a, 0x11);
        assert!(cpu.regs.carry());
    }

    #[test]
    fn test_sub_borrow_sets_carry() {
        let cpu = run_program(&[
            Instruction::MovImm { reg: Reg::A, value: 3 },
            Instruction::SubImm { value: 5 },
            Instruction::Halt,
        ]);

        assert_eq!(cpu.regs.a, 0xFE);
        assert!(cpu.regs.carry());
    }

    #[test]
    fn test_sticky_carry_survives_non_overflowing_add() {
        let cpu = run_program(&[
            Instruction::MovImm { reg: Reg::A, value: 0xFF },
            Instruction::AddImm { value: 0x01 }, // sets carry
            Instruction::AddImm { value: 0x01 }, // no overflow, carry stays
            Instruction::Halt,
        ]);

        assert_eq!(cpu.regs.a, 0x01);
        assert!(cpu.regs.carry());
    }

    #[test]
    fn test_conventional_carry_cleared_by_non_overflowing_add() {
        let mut cpu = Cpu::with_carry_mode(CarryMode::Conventional);
        cpu.load_image(&make_program(&[
            Instruction::MovImm { reg: Reg::A, value: 0xFF },
            Instruction::AddImm { value: 0x01 }, // sets carry
            Instruction::AddImm { value: 0x01 }, // recomputes: cleared
            Instruction::Halt,
        ]))
        .unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.regs.a, 0x01);
        assert!(!cpu.regs.carry());
    }

    #[test]
    fn test_unknown_opcode_faults_without_register_damage() {
        let mut cpu = Cpu::new();
        cpu.load_image(&[0x00, 0xEE]).unwrap(); // NOP, then junk

        let err = cpu.run().unwrap_err();

        assert_eq!(
            err,
            CpuError::Decode {
                pc: 1,
                source: DecodeError::UnknownOpcode { byte: 0xEE },
            }
        );
        assert!(cpu.is_faulted());
        // Only the fetch advanced PC; no other register moved.
        assert_eq!(cpu.regs.pc, 2);
        for reg in Reg::ALL {
            assert_eq!(cpu.regs.get(reg), 0);
        }
    }

    #[test]
    fn test_fetch_past_end_of_memory_faults() {
        // NOPs all the way: PC walks off the end of an 8-cell memory.
        let mut cpu = Cpu::new();
        cpu.mem = Memory::with_capacity(8);

        let err = cpu.run().unwrap_err();

        assert_eq!(
            err,
            CpuError::Memory {
                pc: 8,
                source: MemoryError::AddressOutOfRange { addr: 8, capacity: 8 },
            }
        );
        assert!(cpu.is_faulted());
    }

    #[test]
    fn test_operand_address_out_of_bounds_faults() {
        let mut cpu = Cpu::new();
        cpu.mem = Memory::with_capacity(16);
        cpu.mem.write(0, 0x08).unwrap(); // MOV A, [0x20]
        cpu.mem.write(1, 0x20).unwrap();

        let err = cpu.run().unwrap_err();

        assert_eq!(
            err,
            CpuError::Memory {
                pc: 2,
                source: MemoryError::AddressOutOfRange {
                    addr: 0x20,
                    capacity: 16
                },
            }
        );
        assert!(cpu.is_faulted());
        assert_eq!(cpu.regs.a, 0);
    }

    #[test]
    fn test_step_after_halt_is_an_error() {
        let mut cpu = Cpu::new();
        cpu.load_image(&[0x01]).unwrap();
        cpu.run().unwrap();

        assert_eq!(
            cpu.step().unwrap_err(),
            CpuError::NotRunning(CpuState::Halted)
        );
    }

    #[test]
    fn test_run_limited_stops_at_cap() {
        // An image of NOPs: never halts on its own within the cap.
        let mut cpu = Cpu::new();
        cpu.load_image(&[0x00; 64]).unwrap();

        let executed = cpu.run_limited(10).unwrap();

        assert_eq!(executed, 10);
        assert!(cpu.is_running());
        assert_eq!(cpu.regs.pc, 10);
    }

    #[test]
    fn test_run_limited_with_max_cap_runs_to_halt() {
        let mut cpu = Cpu::new();
        cpu.load_image(&[0x00, 0x00, 0x01]).unwrap(); // NOP, NOP, HLT

        let executed = cpu.run_limited(u64::MAX).unwrap();

        assert_eq!(executed, 3);
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_segment_and_stack_pointer_stay_inert() {
        let cpu = run_program(&[
            Instruction::MovImm { reg: Reg::A, value: 0xFF },
            Instruction::AddImm { value: 0xFF },
            Instruction::MovStore { reg: Reg::A, addr: 0x30 },
            Instruction::Halt,
        ]);

        assert_eq!(cpu.regs.ss, 0);
        assert_eq!(cpu.regs.sp, 0);
    }

    proptest! {
        #[test]
        fn prop_mov_imm_sets_register_and_advances_pc(
            reg_idx in 0u8..6,
            value: u8,
        ) {
            let reg = Reg::from_index(reg_idx).unwrap();
            let mut cpu = Cpu::new();
            cpu.load_image(&make_program(&[
                Instruction::MovImm { reg, value },
                Instruction::Halt,
            ])).unwrap();

            let pc_before = cpu.regs.pc;
            cpu.step().unwrap();

            prop_assert_eq!(cpu.regs.get(reg), value);
            prop_assert_eq!(cpu.regs.pc, pc_before + 2);
        }

        #[test]
        fn prop_add_imm_wraps_and_sets_carry_on_overflow(a: u8, b: u8) {
            let mut cpu = Cpu::new();
            cpu.regs.a = a;
            cpu.load_image(&make_program(&[
                Instruction::AddImm { value: b },
                Instruction::Halt,
            ])).unwrap();

            cpu.run().unwrap();

            let expected = a.wrapping_add(b);
            prop_assert_eq!(cpu.regs.a, expected);
            prop_assert_eq!(cpu.regs.carry(), expected < a);
        }

        #[test]
        fn prop_add_imm_never_clears_sticky_carry(a: u8, b: u8) {
            let mut cpu = Cpu::new();
            cpu.regs.a = a;
            cpu.regs.set_carry();
            cpu.load_image(&make_program(&[
                Instruction::AddImm { value: b },
                Instruction::Halt,
            ])).unwrap();

            cpu.run().unwrap();

            prop_assert!(cpu.regs.carry());
        }

        #[test]
        fn prop_adc_with_carry_set_matches_add_of_incremented_operand(a: u8, b: u8) {
            let mut adc = Cpu::new();
            adc.regs.a = a;
            adc.regs.set_carry();
            adc.load_image(&make_program(&[
                Instruction::AddCarryImm { value: b },
                Instruction::Halt,
            ])).unwrap();
            adc.run().unwrap();

            let mut add = Cpu::new();
            add.regs.a = a;
            add.regs.set_carry();
            add.load_image(&make_program(&[
                Instruction::AddImm { value: b.wrapping_add(1) },
                Instruction::Halt,
            ])).unwrap();
            add.run().unwrap();

            prop_assert_eq!(adc.regs.a, add.regs.a);
        }

        #[test]
        fn prop_sub_imm_wraps_and_sets_carry_on_borrow(a: u8, b: u8) {
            let mut cpu = Cpu::new();
            cpu.regs.a = a;
            cpu.load_image(&make_program(&[
                Instruction::SubImm { value: b },
                Instruction::Halt,
            ])).unwrap();

            cpu.run().unwrap();

            prop_assert_eq!(cpu.regs.a, a.wrapping_sub(b));
            prop_assert_eq!(cpu.regs.carry(), a < b);
        }
    }
}
