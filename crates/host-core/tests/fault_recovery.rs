//! Fault handling across whole ticks: recovery, abandonment, no carry-over.

use host_core::bus::disk::DiskController;
use host_core::bus::serial::Serial;
use host_core::cpu::isa::{Instruction, Opcode};
use host_core::{
    BusAdapter, DispatchOutcome, FaultKind, HeadlessHost, ManualClock, ReferenceCpu, RomImage,
    Session, SessionConfig,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

fn session(rom: RomImage, debug: bool) -> Session<ReferenceCpu, HeadlessHost> {
    Session::new(
        SessionConfig {
            cpu_hz: 60_000,
            debug,
            headless: true,
            ..SessionConfig::default()
        },
        ReferenceCpu::new(rom),
        BusAdapter::new(Serial::buffered(), DiskController::default()),
        HeadlessHost::default(),
        0,
    )
    .expect("valid config")
}

/// Ten `NOP`s, a breakpoint, then a jump back to the start.
fn breakpoint_loop() -> RomImage {
    let mut program = vec![Instruction::new(Opcode::Nop, 0, 0, 0); 10];
    program.push(Instruction::new(Opcode::Brk, 0, 0, 0));
    program.push(Instruction::new(Opcode::Jmp, 0, 0, 0xFFF4));
    RomImage::from_program(&program)
}

/// Installs an `IRET`-only divide-by-zero handler, then divides by zero
/// forever.
fn divide_loop() -> RomImage {
    RomImage::from_program(&[
        Instruction::new(Opcode::Movi, 1, 0, 8 * 4),
        Instruction::new(Opcode::Movhi, 1, 0, 0xF000),
        Instruction::new(Opcode::Movi, 2, 0, 0x100 * 4),
        Instruction::new(Opcode::Store, 2, 1, 0),
        Instruction::new(Opcode::Ise, 0, 0, 0),
        Instruction::new(Opcode::Div, 3, 0, 0),
        Instruction::new(Opcode::Jmp, 0, 0, 0xFFFE),
        Instruction::new(Opcode::Nop, 0, 0, 0),
        Instruction::new(Opcode::Iret, 0, 0, 0),
    ])
}

#[test]
fn unrecoverable_fault_abandons_rest_of_tick_without_carry_over() {
    let mut session = session(breakpoint_loop(), true);
    let mut clock = ManualClock::new(0);

    clock.advance(16);
    let first = session.iterate(&mut clock);
    clock.advance(16);
    let second = session.iterate(&mut clock);

    for report in [first, second] {
        let fault = report.abandoned.expect("breakpoint abandons the tick");
        assert_eq!(fault.kind, FaultKind::Breakpoint);
        assert!(report.executed < report.budget.total());
        assert!(matches!(report.dispatch, DispatchOutcome::Dispatched { .. }));
    }
    assert_eq!(first.executed, 11);
    assert_eq!(second.executed, 13);
    assert_eq!(second.budget, first.budget);
    assert_eq!(second.budget.total(), 1_000);
    assert_eq!(session.fault_counters().unrecoverable, 2);
}

#[test]
fn recovered_faults_keep_consuming_the_same_tick() {
    let mut session = session(divide_loop(), false);
    let mut clock = ManualClock::new(0);

    clock.advance(16);
    let report = session.iterate(&mut clock);

    assert_eq!(report.abandoned, None);
    assert!(report.recovered > 10);
    // Each slice may strand fewer cycles than its next instruction costs.
    assert!(report.executed + 4 * u64::from(report.budget.slices) >= report.budget.total());
    assert!(report.executed <= report.budget.total());
    assert_eq!(
        session.fault_counters().recovered,
        u64::from(report.recovered)
    );
}

#[test]
fn session_survives_a_long_run_of_abandoned_ticks() {
    let mut session = session(breakpoint_loop(), false);
    let mut clock = ManualClock::new(0);

    for _ in 0..200 {
        clock.advance(16);
        let report = session.iterate(&mut clock);
        assert!(report.abandoned.is_some());
    }

    assert_eq!(session.timing().tick_count, 200);
    assert_eq!(session.bus().rtc().uptime(), 200 * 16);
}
