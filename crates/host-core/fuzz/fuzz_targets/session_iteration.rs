#![no_main]

use host_core::bus::disk::{DiskController, DiskImage, DiskTable};
use host_core::bus::serial::Serial;
use host_core::{
    BudgetMode, BusAdapter, HeadlessHost, ManualClock, ReferenceCpu, RomImage, Session,
    SessionConfig,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let (control, rom) = data.split_at(4);
    let budget_mode = if control[0] & 1 == 0 {
        BudgetMode::Fixed
    } else {
        BudgetMode::Adaptive
    };
    let config = SessionConfig {
        cpu_hz: 60_000 + u32::from(control[1]) * 1_000,
        budget_mode,
        headless: true,
        ..SessionConfig::default()
    };

    let mut table = DiskTable::default();
    table.register(DiskImage::from_bytes("fuzz", rom.to_vec()));
    let bus = BusAdapter::new(Serial::buffered(), DiskController::new(table));
    let Ok(mut session) = Session::new(
        config,
        ReferenceCpu::new(RomImage::from_bytes(rom)),
        bus,
        HeadlessHost::default(),
        0,
    ) else {
        return;
    };

    let mut clock = ManualClock::new(0);
    for step in 0..usize::from(control[2] % 8) + 1 {
        clock.advance(u64::from(control[3].rotate_left(u32::try_from(step).unwrap_or(0)) % 40));
        let report = session.iterate(&mut clock);
        assert!(report.executed <= report.budget.total());
        assert!(session.timing().cycles_per_tick_estimate > 0);
    }
});
