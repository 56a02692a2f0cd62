//! Simple assembler for vCPU programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! LABEL:              ; Define a label
//!     MOV A, #0x05    ; Immediate: A := 5
//!     MOV [0x10], A   ; Store: mem[0x10] := A
//!     MOV B, [0x10]   ; Load: B := mem[0x10]
//!     ADD #1          ; A := A + 1
//!     ADC [VALUE]     ; A := A + mem[VALUE] + carry
//!     SUB #3          ; A := A - 3
//!     HLT
//!
//!     ORG 0x10        ; Pad the image with zeros up to address 0x10
//! VALUE: DB 42        ; Define a data byte
//! ```
//!
//! Numbers are decimal or `0x` hex. A label may stand in for a value
//! anywhere except `ORG`, and resolves to its byte address in the image.

use crate::cpu::decode::Opcode;
use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::registers::Reg;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source text into a program image.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// A parsed operand atom: register, `#immediate`, or `[address]`.
enum Atom {
    Reg(Reg),
    Imm(ValueRef),
    Mem(ValueRef),
}

/// A byte value that is either known or a label to resolve in pass 2.
enum ValueRef {
    Literal(u8),
    Label(String),
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> image address).
    symbols: HashMap<String, usize>,
    /// Unresolved references (image offset, label, source line).
    pending: Vec<(usize, String, usize)>,
    /// Output image bytes.
    output: Vec<u8>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u8>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve forward references
        self.resolve_references()?;

        Ok(std::mem::take(&mut self.output))
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Strip comments and surrounding whitespace
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let mut line = line.trim();

        if line.is_empty() {
            return Ok(());
        }

        // Label definition, possibly followed by an instruction
        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if !label.is_empty() {
                if self.symbols.contains_key(&label) {
                    return Err(AssemblerError::DuplicateLabel {
                        line: line_num,
                        label,
                    });
                }
                self.symbols.insert(label, self.output.len());
            }
            line = line[colon_idx + 1..].trim();
            if line.is_empty() {
                return Ok(());
            }
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, r)) => (m.to_uppercase(), r.trim()),
            None => (line.to_uppercase(), ""),
        };

        match mnemonic.as_str() {
            // Directives
            "ORG" => {
                let addr = parse_number(rest).ok_or_else(|| AssemblerError::SyntaxError {
                    line: line_num,
                    message: "ORG requires a numeric address".into(),
                })?;
                if addr < self.output.len() as i64 {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!(
                            "ORG {} is behind current address {}",
                            addr,
                            self.output.len()
                        ),
                    });
                }
                // An image past memory capacity could never load anyway.
                if addr > MEMORY_SIZE as i64 {
                    return Err(AssemblerError::ValueOutOfRange {
                        line: line_num,
                        value: addr,
                    });
                }
                self.output.resize(addr as usize, 0);
            }

            "DB" | "DAT" => {
                let value = self.parse_value(rest, line_num)?;
                self.emit_value(value, line_num);
            }

            // Instructions
            "NOP" => self.emit_opcode(Opcode::Nop),
            "HLT" | "HALT" => self.emit_opcode(Opcode::Halt),

            "MOV" => {
                let (dst, src) = split_two_operands(rest, line_num)?;
                let dst = self.parse_atom(dst, line_num)?;
                let src = self.parse_atom(src, line_num)?;
                match (dst, src) {
                    (Atom::Reg(reg), Atom::Imm(value)) => {
                        self.emit_opcode(Opcode::MovImm(reg));
                        self.emit_value(value, line_num);
                    }
                    (Atom::Reg(reg), Atom::Mem(addr)) => {
                        self.emit_opcode(Opcode::MovLoad(reg));
                        self.emit_value(addr, line_num);
                    }
                    (Atom::Mem(addr), Atom::Reg(reg)) => {
                        self.emit_opcode(Opcode::MovStore(reg));
                        self.emit_value(addr, line_num);
                    }
                    _ => {
                        return Err(AssemblerError::SyntaxError {
                            line: line_num,
                            message: "MOV needs a register and an immediate or address".into(),
                        })
                    }
                }
            }

            "ADD" | "ADC" | "SUB" => {
                let atom = self.parse_atom(rest, line_num)?;
                let (opcode, value) = match (mnemonic.as_str(), atom) {
                    ("ADD", Atom::Imm(v)) => (Opcode::AddImm, v),
                    ("ADD", Atom::Mem(v)) => (Opcode::AddMem, v),
                    ("ADC", Atom::Imm(v)) => (Opcode::AddCarryImm, v),
                    ("ADC", Atom::Mem(v)) => (Opcode::AddCarryMem, v),
                    ("SUB", Atom::Imm(v)) => (Opcode::SubImm, v),
                    ("SUB", Atom::Mem(v)) => (Opcode::SubMem, v),
                    _ => {
                        return Err(AssemblerError::SyntaxError {
                            line: line_num,
                            message: format!(
                                "{} needs an immediate or address operand",
                                mnemonic
                            ),
                        })
                    }
                };
                self.emit_opcode(opcode);
                self.emit_value(value, line_num);
            }

            _ => {
                return Err(AssemblerError::UnknownMnemonic {
                    line: line_num,
                    mnemonic,
                })
            }
        }

        Ok(())
    }

    fn parse_atom(&mut self, token: &str, line_num: usize) -> Result<Atom, AssemblerError> {
        let token = token.trim();

        if let Some(inner) = token.strip_prefix('#') {
            return Ok(Atom::Imm(self.parse_value(inner, line_num)?));
        }

        if let Some(inner) = token.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("unterminated address operand {:?}", token),
                })?;
            return Ok(Atom::Mem(self.parse_value(inner, line_num)?));
        }

        let upper = token.to_uppercase();
        match upper.as_str() {
            "A" => Ok(Atom::Reg(Reg::A)),
            "B" => Ok(Atom::Reg(Reg::B)),
            "C" => Ok(Atom::Reg(Reg::C)),
            "D" => Ok(Atom::Reg(Reg::D)),
            "E" => Ok(Atom::Reg(Reg::E)),
            "F" => Ok(Atom::Reg(Reg::F)),
            _ => Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("expected register, #immediate, or [address], found {:?}", token),
            }),
        }
    }

    fn parse_value(&mut self, token: &str, line_num: usize) -> Result<ValueRef, AssemblerError> {
        let token = token.trim();

        if let Some(value) = parse_number(token) {
            if !(0..=255).contains(&value) {
                return Err(AssemblerError::ValueOutOfRange {
                    line: line_num,
                    value,
                });
            }
            return Ok(ValueRef::Literal(value as u8));
        }

        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid value {:?}", token),
            });
        }

        Ok(ValueRef::Label(token.to_uppercase()))
    }

    fn emit_opcode(&mut self, opcode: Opcode) {
        self.output.push(opcode.to_byte());
    }

    fn emit_value(&mut self, value: ValueRef, line_num: usize) {
        match value {
            ValueRef::Literal(byte) => self.output.push(byte),
            ValueRef::Label(label) => {
                self.pending.push((self.output.len(), label, line_num));
                self.output.push(0); // patched in pass 2
            }
        }
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (offset, label, line_num) in &self.pending {
            let addr = *self
                .symbols
                .get(label)
                .ok_or_else(|| AssemblerError::UndefinedLabel {
                    line: *line_num,
                    label: label.clone(),
                })?;
            if addr > 255 {
                return Err(AssemblerError::ValueOutOfRange {
                    line: *line_num,
                    value: addr as i64,
                });
            }
            self.output[*offset] = addr as u8;
        }
        Ok(())
    }
}

/// Parse a decimal or `0x`-prefixed hex number.
fn parse_number(token: &str) -> Option<i64> {
    let token = token.trim();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        token.parse::<i64>().ok()
    }
}

/// Split `"X, Y"` into its two operands.
fn split_two_operands(rest: &str, line_num: usize) -> Result<(&str, &str), AssemblerError> {
    rest.split_once(',')
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| AssemblerError::SyntaxError {
            line: line_num,
            message: "expected two comma-separated operands".into(),
        })
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

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; Copy a value through memory
            MOV A, #0x05
            MOV [0x10], A
            MOV B, [0x10]
            HLT
        "#;

        let image = assemble(source).unwrap();
        assert_eq!(image, vec![0x02, 0x05, 0x0E, 0x10, 0x09, 0x10, 0x01]);
    }

    #[test]
    fn test_assemble_arithmetic() {
        let source = r#"
            MOV A, #250
            ADD #10
            ADC [0x30]
            SUB #1
            HLT
        "#;

        let image = assemble(source).unwrap();
        assert_eq!(
            image,
            vec![0x02, 250, 0x14, 10, 0x17, 0x30, 0x18, 1, 0x01]
        );
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
            MOV A, [value]
            ADD [VALUE]     ; labels are case-insensitive
            MOV [result], A
            HLT
        value:  DB 21
        result: DB 0
        "#;

        let image = assemble(source).unwrap();
        // value lands at offset 7, result at 8
        assert_eq!(image, vec![0x08, 7, 0x16, 7, 0x0E, 8, 0x01, 21, 0]);
    }

    #[test]
    fn test_org_pads_with_zeros() {
        let source = r#"
            HLT
            ORG 0x08
            DB 0xAA
        "#;

        let image = assemble(source).unwrap();
        assert_eq!(image, vec![0x01, 0, 0, 0, 0, 0, 0, 0, 0xAA]);
    }

    #[test]
    fn test_org_beyond_memory_capacity_is_error() {
        let err = assemble("ORG 0x1000000\nDB 1\n").unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::ValueOutOfRange {
                line: 1,
                value: 0x1000000
            }
        ));

        // The last in-bounds address still works
        let image = assemble("ORG 0x0FFF\nDB 1\n").unwrap();
        assert_eq!(image.len(), MEMORY_SIZE);
        assert_eq!(image[MEMORY_SIZE - 1], 1);
    }

    #[test]
    fn test_org_backwards_is_error() {
        let err = assemble("NOP\nNOP\nORG 1\n").unwrap_err();
        assert!(matches!(err, AssemblerError::SyntaxError { line: 3, .. }));
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = assemble("FROB #1").unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::UnknownMnemonic { line: 1, ref mnemonic } if mnemonic == "FROB"
        ));
    }

    #[test]
    fn test_undefined_label() {
        let err = assemble("MOV A, [nowhere]\nHLT").unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::UndefinedLabel { line: 1, ref label } if label == "NOWHERE"
        ));
    }

    #[test]
    fn test_duplicate_label() {
        let err = assemble("x: NOP\nx: NOP").unwrap_err();
        assert!(matches!(err, AssemblerError::DuplicateLabel { line: 2, .. }));
    }

    #[test]
    fn test_immediate_out_of_range() {
        let err = assemble("MOV A, #256").unwrap_err();
        assert!(matches!(
            err,
            AssemblerError::ValueOutOfRange { line: 1, value: 256 }
        ));
    }
}
