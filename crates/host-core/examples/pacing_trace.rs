//! Prints per-tick budgets for both policies under a jittery synthetic clock.
//!
//! Usage: `cargo run -p host-core --example pacing_trace [ticks]`

use host_core::bus::disk::DiskController;
use host_core::bus::serial::Serial;
use host_core::{
    BudgetMode, BusAdapter, ConfigError, HeadlessHost, ManualClock, ReferenceCpu, RomImage,
    Session, SessionConfig,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

/// Alternates slow and fast frames around the nominal 16 ms tick.
const JITTER_MS: [u64; 4] = [20, 13, 19, 14];

fn trace(mode: BudgetMode, ticks: usize) -> Result<(), ConfigError> {
    let config = SessionConfig {
        budget_mode: mode,
        headless: true,
        ..SessionConfig::default()
    };
    let mut session = Session::new(
        config,
        ReferenceCpu::new(RomImage::builtin()),
        BusAdapter::new(Serial::buffered(), DiskController::default()),
        HeadlessHost::default(),
        0,
    )?;
    let mut clock = ManualClock::new(0);

    println!("{mode:?}");
    println!("tick elapsed per_slice leftover estimate executed");
    for tick in 0..ticks {
        clock.advance(JITTER_MS[tick % JITTER_MS.len()]);
        let report = session.iterate(&mut clock);
        println!(
            "{:>4} {:>7} {:>9} {:>8} {:>8} {:>8}",
            report.tick,
            report.elapsed_ms,
            report.budget.per_slice,
            report.budget.leftover,
            session.timing().cycles_per_tick_estimate,
            report.executed,
        );
    }
    println!();
    Ok(())
}

fn main() -> Result<(), ConfigError> {
    let ticks = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(12);

    trace(BudgetMode::Fixed, ticks)?;
    trace(BudgetMode::Adaptive, ticks)
}
