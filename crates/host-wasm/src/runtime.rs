//! Target-independent half of the bindings: a session driven one animation
//! frame at a time.

use std::collections::VecDeque;

use host_core::bus::disk::{DiskController, DiskImage, DiskTable};
use host_core::bus::framebuffer::Framebuffer;
use host_core::bus::serial::Serial;
use host_core::{
    BudgetMode, BusAdapter, Clock, ConfigError, ExitSignal, FaultCounters, Host, HostEvent,
    LoopState, ReferenceCpu, RomImage, Session, SessionConfig,
};
use serde::{Deserialize, Serialize};

/// Options accepted from JavaScript. Absent fields keep their defaults; the
/// budget policy defaults to adaptive because the browser owns the cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub cpu_hz: u32,
    pub ticks_per_second: u32,
    pub frames_per_update: u32,
    pub budget_mode: BudgetMode,
    pub debug: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            cpu_hz: defaults.cpu_hz,
            ticks_per_second: defaults.ticks_per_second,
            frames_per_update: defaults.frames_per_update,
            budget_mode: BudgetMode::Adaptive,
            debug: false,
        }
    }
}

impl From<WebConfig> for SessionConfig {
    fn from(web: WebConfig) -> Self {
        Self {
            cpu_hz: web.cpu_hz,
            ticks_per_second: web.ticks_per_second,
            frames_per_update: web.frames_per_update,
            budget_mode: web.budget_mode,
            debug: web.debug,
            ..Self::default()
        }
    }
}

/// Host that keeps the last presented frame for the page to blit.
#[derive(Debug, Default)]
pub struct WebHost {
    pending: VecDeque<HostEvent>,
    frame: Vec<u32>,
    frames: u64,
}

impl Host for WebHost {
    fn redraw(&mut self, framebuffer: &Framebuffer) {
        self.frame.clear();
        self.frame.extend_from_slice(framebuffer.pixels());
        self.frames += 1;
    }

    fn poll_events(&mut self) -> Vec<HostEvent> {
        self.pending.drain(..).collect()
    }
}

pub struct Runtime<C> {
    session: Session<ReferenceCpu, WebHost>,
    clock: C,
}

impl<C: Clock> Runtime<C> {
    pub fn new(
        config: SessionConfig,
        rom: Option<&[u8]>,
        disks: Vec<DiskImage>,
        mut clock: C,
    ) -> Result<Self, ConfigError> {
        let mut table = DiskTable::default();
        for image in disks {
            table.register(image);
        }
        let rom = rom.map_or_else(RomImage::builtin, RomImage::from_bytes);
        let bus = BusAdapter::new(Serial::buffered(), DiskController::new(table));
        let now = clock.now_ms();
        Ok(Self {
            session: Session::new(config, ReferenceCpu::new(rom), bus, WebHost::default(), now)?,
            clock,
        })
    }

    /// One animation frame's worth of emulation. Returns `false` once the
    /// loop has stopped.
    pub fn step(&mut self) -> bool {
        self.session.step(&mut self.clock) == LoopState::Running
    }

    pub fn push_event(&mut self, event: HostEvent) {
        self.session.host_mut().pending.push_back(event);
    }

    pub fn push_serial_input(&mut self, bytes: &[u8]) {
        self.session.bus_mut().serial_mut().push_input(bytes);
    }

    /// Serial output produced since the previous call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.session.bus_mut().serial_mut().take_captured()
    }

    pub fn frame(&self) -> &[u32] {
        &self.session.host().frame
    }

    pub const fn frames_presented(&self) -> u64 {
        self.session.host().frames
    }

    pub fn running(&self) -> bool {
        self.session.state() == LoopState::Running
    }

    pub const fn exit_signal(&self) -> ExitSignal {
        self.session.exit_signal()
    }

    pub const fn fault_counters(&self) -> FaultCounters {
        self.session.fault_counters()
    }

    pub const fn tick_count(&self) -> u64 {
        self.session.timing().tick_count
    }
}
