//! Integration tests for the host-runner CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use host_core::cpu::isa::{Instruction, Opcode};
#[cfg(feature = "window")]
use minifb as _;
use thiserror as _;
use tracing as _;
use tracing_subscriber as _;

fn runner(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_host-runner"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run host-runner")
}

/// ROM that prints `bye` on the serial line and requests power-off.
fn write_power_off_rom(dir: &Path) -> PathBuf {
    write_rom(dir, "power-off.rom", &[])
}

/// Power-off ROM that first stops on a `BRK`, abandoning the first tick.
fn write_breakpoint_rom(dir: &Path) -> PathBuf {
    write_rom(dir, "breakpoint.rom", &[Instruction::new(Opcode::Brk, 0, 0, 0)])
}

fn write_rom(dir: &Path, name: &str, prelude: &[Instruction]) -> PathBuf {
    let mut program = prelude.to_vec();
    for byte in b"bye\n" {
        program.push(Instruction::new(Opcode::Movi, 3, 0, u16::from(*byte)));
        program.push(Instruction::new(Opcode::Out, 0, 3, 0));
    }
    program.extend([
        Instruction::new(Opcode::Movi, 8, 0, 0),
        Instruction::new(Opcode::Movhi, 8, 0, 0x8001),
        Instruction::new(Opcode::Out, 8, 0, 0),
        Instruction::new(Opcode::Halt, 0, 0, 0),
        Instruction::new(Opcode::Jmp, 0, 0, 0xFFFE),
    ]);
    let bytes: Vec<u8> = program
        .iter()
        .flat_map(|instruction| instruction.encode().to_le_bytes())
        .collect();

    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn help_prints_usage_and_succeeds() {
    let output = runner(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: host-runner"));
    assert!(stdout.contains("--disk <path>"));
}

#[test]
fn unknown_option_fails() {
    let output = runner(&["--turbo"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized option: --turbo"));
    assert!(stderr.contains("Usage: host-runner"));
}

#[test]
fn disk_flag_without_path_fails() {
    let output = runner(&["--headless", "--disk"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no disk image specified"));
}

#[test]
fn rom_flag_without_path_fails() {
    let output = runner(&["--rom"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no rom image specified"));
}

#[test]
fn unopenable_disk_is_a_startup_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let rom = write_power_off_rom(temp_dir.path());
    let missing = temp_dir.path().join("missing.img");

    let output = runner(&[
        "--headless",
        "--rom",
        rom.to_str().unwrap(),
        "--disk",
        missing.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot open disk image"));
    assert!(stderr.contains("missing.img"));
    assert!(output.stdout.is_empty());
}

#[test]
fn guest_power_off_ends_a_headless_run() {
    let temp_dir = tempfile::tempdir().unwrap();
    let rom = write_power_off_rom(temp_dir.path());
    let first = temp_dir.path().join("first.img");
    let second = temp_dir.path().join("second.img");
    fs::write(&first, vec![0; 1024]).unwrap();
    fs::write(&second, vec![0; 512]).unwrap();

    let output = runner(&[
        "--headless",
        "--rom",
        rom.to_str().unwrap(),
        "--disk",
        first.to_str().unwrap(),
        "--disk",
        second.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert_eq!(output.stdout, b"bye\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("registered disk image"));
    assert!(stderr.contains("using boot ROM"));
    assert!(stderr.contains("session ended"));
}

#[test]
fn debug_flag_logs_budget_decisions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let rom = write_power_off_rom(temp_dir.path());

    let output = runner(&["--headless", "--debug", "--rom", rom.to_str().unwrap()]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("tick budget"));
}

#[test]
fn debug_flag_logs_processor_faults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let rom = write_breakpoint_rom(temp_dir.path());

    let output = runner(&["--headless", "--debug", "--rom", rom.to_str().unwrap()]);

    assert!(output.status.success());
    assert_eq!(output.stdout, b"bye\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("processor fault"));
    assert!(stderr.contains("debugger breakpoint"));
}

#[test]
fn faults_are_not_logged_without_debug() {
    let temp_dir = tempfile::tempdir().unwrap();
    let rom = write_breakpoint_rom(temp_dir.path());

    let output = runner(&["--headless", "--rom", rom.to_str().unwrap()]);

    assert!(output.status.success());
    assert_eq!(output.stdout, b"bye\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("processor fault"));
    assert!(!stderr.contains("debugger breakpoint"));
}
