//! vCPU Emulator - CLI Entry Point
//!
//! Commands:
//! - `vcpu run <image>` - Run a binary program image
//! - `vcpu asm <source>` - Assemble a source file to an image
//! - `vcpu disasm <image>` - Disassemble an image

use clap::{Parser, Subcommand};
use serde::Serialize;
use vcpu::asm::disasm::format_instruction;
use vcpu::{assemble, disassemble, load_image, save_image, CarryMode, Cpu, CpuState, Reg};

#[derive(Parser)]
#[command(name = "vcpu")]
#[command(version = "0.1.0")]
#[command(about = "An 8-bit instructional virtual CPU emulator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program image until it halts
    Run {
        /// Path to the binary program image
        image: String,
        /// Maximum number of instructions to execute
        #[arg(short, long, default_value = "10000")]
        max_cycles: u64,
        /// Print each instruction as it executes
        #[arg(short, long)]
        trace: bool,
        /// Carry flag policy: "sticky" (reference behavior) or "conventional"
        #[arg(short, long, default_value = "sticky")]
        carry_mode: CarryMode,
        /// Print the final state as JSON instead of the text report
        #[arg(short, long)]
        json: bool,
    },
    /// Assemble source to a program image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a program image to readable text
    Disasm {
        /// Path to the program image
        image: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run {
            image,
            max_cycles,
            trace,
            carry_mode,
            json,
        }) => {
            run_image(&image, max_cycles, trace, carry_mode, json);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        None => {
            println!("vCPU Emulator v0.1.0");
            println!("An 8-bit instructional virtual CPU");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn run_image(path: &str, max_cycles: u64, trace: bool, carry_mode: CarryMode, json: bool) {
    // Startup banner, emitted once before execution starts
    println!("Virtual CPU v1.0-alpha");
    println!("vCPU Instruction Set v01");
    println!("Reading in program '{}'...", path);

    let image = match load_image(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("❌ Failed to load program: {}", e);
            std::process::exit(1);
        }
    };

    let mut cpu = Cpu::with_carry_mode(carry_mode);
    if let Err(e) = cpu.load_image(&image) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    let mut fault = None;
    while cpu.is_running() && cpu.cycles < max_cycles {
        let pc = cpu.regs.pc;
        match cpu.step() {
            Ok(instr) => {
                if trace {
                    println!(
                        "{:04X}: {:<18} A={:02X} FLAGS={:04X}",
                        pc,
                        format_instruction(&instr),
                        cpu.regs.a,
                        cpu.regs.flags
                    );
                }
            }
            Err(e) => {
                eprintln!("❌ {}", e);
                fault = Some(e.to_string());
                break;
            }
        }
    }

    if json {
        print_report_json(&cpu, fault.as_deref());
    } else {
        print_report(&cpu, fault.is_some());
    }

    if cpu.is_running() && cpu.cycles >= max_cycles {
        println!();
        println!(
            "⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.",
            max_cycles
        );
    }

    if fault.is_some() {
        std::process::exit(1);
    }
}

/// The completion report, with the field widths existing tooling expects:
/// registers as 2-digit hex, pointer pair as 4-digit hex, flags as a
/// 16-bit binary string, PC as 4-digit hex.
fn print_report(cpu: &Cpu, faulted: bool) {
    println!();
    if faulted {
        println!("=== Execution faulted ===");
    } else {
        println!("=== Execution completed ===");
    }
    println!("A:  {:02X}  B:  {:02X}", cpu.regs.a, cpu.regs.b);
    println!("C:  {:02X}  D:  {:02X}", cpu.regs.c, cpu.regs.d);
    println!("E:  {:02X}  F:  {:02X}", cpu.regs.e, cpu.regs.f);
    println!("SS: {:04X}  SP: {:04X}", cpu.regs.ss, cpu.regs.sp);
    println!("FLAGS: {:016b}", cpu.regs.flags);
    println!("Program Counter: {:04X}", cpu.regs.pc);
}

#[derive(Serialize)]
struct JsonReport<'a> {
    state: CpuState,
    cycles: u64,
    registers: std::collections::BTreeMap<char, u8>,
    ss: u16,
    sp: u16,
    flags: u16,
    pc: u16,
    fault: Option<&'a str>,
}

fn print_report_json(cpu: &Cpu, fault: Option<&str>) {
    let report = JsonReport {
        state: cpu.state,
        cycles: cpu.cycles,
        registers: Reg::ALL
            .into_iter()
            .map(|r| (r.name(), cpu.regs.get(r)))
            .collect(),
        ss: cpu.regs.ss,
        sp: cpu.regs.sp,
        flags: cpu.regs.flags,
        pc: cpu.regs.pc,
        fault,
    };

    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("❌ Failed to serialize report: {}", e);
            std::process::exit(1);
        }
    }
}

fn assemble_file(source_path: &str, output: Option<String>) {
    let out_path = output.unwrap_or_else(|| {
        if source_path.ends_with(".asm") {
            source_path.replace(".asm", ".bin")
        } else {
            format!("{}.bin", source_path)
        }
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let image = match assemble(&source) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} bytes", image.len());

    if let Err(e) = save_image(&out_path, &image) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    println!("📖 Disassembling: {}", image_path);
    println!();

    let image = match load_image(image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(&image));
}
