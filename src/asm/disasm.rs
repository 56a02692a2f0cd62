//! Disassembler for vCPU program images.
//!
//! Converts image bytes back into the assembler's listing syntax. Bytes
//! that do not decode as an opcode are rendered as `DB` data so the
//! listing always round-trips every byte of the image.

use crate::cpu::decode::{Instruction, Opcode};

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction) -> String {
    match *instr {
        Instruction::Nop => "NOP".to_string(),
        Instruction::Halt => "HLT".to_string(),
        Instruction::MovImm { reg, value } => format!("MOV {}, #{:#04X}", reg, value),
        Instruction::MovLoad { reg, addr } => format!("MOV {}, [{:#04X}]", reg, addr),
        Instruction::MovStore { reg, addr } => format!("MOV [{:#04X}], {}", addr, reg),
        Instruction::AddImm { value } => format!("ADD #{:#04X}", value),
        Instruction::AddCarryImm { value } => format!("ADC #{:#04X}", value),
        Instruction::AddMem { addr } => format!("ADD [{:#04X}]", addr),
        Instruction::AddCarryMem { addr } => format!("ADC [{:#04X}]", addr),
        Instruction::SubImm { value } => format!("SUB #{:#04X}", value),
        Instruction::SubMem { addr } => format!("SUB [{:#04X}]", addr),
    }
}

/// Disassemble an image into a listing, one line per instruction.
///
/// Decoding restarts after an undecodable byte, which is emitted as a
/// `DB` line. A trailing opcode with its operand cut off by the end of
/// the image is also emitted as data.
pub fn disassemble(image: &[u8]) -> String {
    let mut output = String::new();
    output.push_str("; vCPU disassembly\n\n");

    let mut pos = 0;
    while pos < image.len() {
        let start = pos;
        let byte = image[pos];
        let line = match Opcode::from_byte(byte) {
            Ok(opcode) if pos + opcode.arity() < image.len() => {
                let operand = if opcode.arity() == 1 { image[pos + 1] } else { 0 };
                let instr = Instruction::with_operand(opcode, operand);
                pos += instr.len();
                format_instruction(&instr)
            }
            _ => {
                pos += 1;
                format!("DB {:#04X}          ; ???", byte)
            }
        };
        output.push_str(&format!("{:#06X}: {}\n", start, line));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::registers::Reg;

    #[test]
    fn test_format_instruction() {
        assert_eq!(
            format_instruction(&Instruction::MovImm {
                reg: Reg::A,
                value: 0x05
            }),
            "MOV A, #0x05"
        );
        assert_eq!(
            format_instruction(&Instruction::MovStore {
                reg: Reg::C,
                addr: 0x10
            }),
            "MOV [0x10], C"
        );
        assert_eq!(
            format_instruction(&Instruction::SubMem { addr: 0xFF }),
            "SUB [0xFF]"
        );
        assert_eq!(format_instruction(&Instruction::Halt), "HLT");
    }

    #[test]
    fn test_disassemble_program() {
        let image = [0x02, 0x05, 0x0E, 0x10, 0x09, 0x10, 0x01];
        let listing = disassemble(&image);

        assert!(listing.contains("MOV A, #0x05"));
        assert!(listing.contains("MOV [0x10], A"));
        assert!(listing.contains("MOV B, [0x10]"));
        assert!(listing.contains("HLT"));
    }

    #[test]
    fn test_disassemble_unknown_byte_as_data() {
        let image = [0x00, 0xEE, 0x01];
        let listing = disassemble(&image);

        assert!(listing.contains("NOP"));
        assert!(listing.contains("DB 0xEE"));
        assert!(listing.contains("HLT"));
    }

    #[test]
    fn test_disassemble_truncated_operand_as_data() {
        // ADD_IMM opcode with no operand byte left
        let listing = disassemble(&[0x14]);
        assert!(listing.contains("DB 0x14"));
    }
}
