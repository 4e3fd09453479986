//! Host-side execution driver: turns wall-clock time into cycle budgets,
//! drives a processor through them in millisecond slices, recovers from
//! faults and paces a periodic vertical-sync interrupt.

/// Stable processor fault taxonomy.
pub mod fault;
pub use fault::{
    Fault, FaultClass, FaultKind, EXCEPTION_BUS_ERROR, EXCEPTION_DIVIDE_BY_ZERO,
    EXCEPTION_INVALID_OPCODE, EXCEPTION_MEMORY_READ, EXCEPTION_MEMORY_WRITE,
};

/// Session configuration and pacing constants.
pub mod config;
pub use config::{
    BudgetMode, ConfigError, SessionConfig, DEFAULT_AUTOADJUST_MARGIN, DEFAULT_CPU_HZ,
    DEFAULT_FRAMES_PER_UPDATE, DEFAULT_TICKS_PER_SECOND, DEFAULT_TOLERANCE_PERCENT,
    VSYNC_INTERRUPT_VECTOR,
};

/// Wall-clock to cycle-budget conversion policies.
pub mod timing;
pub use timing::{
    achieved_ticks_per_second, rescale_estimate, split_tick, AdaptiveBudget, BudgetPolicy,
    FixedBudget, TickBudget, TimingScheduler, TimingState, UptimeSource,
};

/// Port bus and peripherals.
pub mod bus;
pub use bus::{
    Bus, BusAdapter, BusError, DeviceId, Peripheral, PortMapping, POWER_CONTROL_PORT, POWER_OFF,
};

/// Processor contract and slice driving loop.
pub mod engine;
pub use engine::{ExecutionEngine, FaultCounters, Processor, RaiseError, RunOutcome, SliceOutcome};

/// Periodic display-update interrupt.
pub mod interrupt;
pub use interrupt::{DispatchOutcome, InterruptDispatcher};

/// Presentation, input and clock collaborators.
pub mod host;
pub use host::{Clock, HeadlessHost, Host, HostEvent, ManualClock, SystemClock};

/// Session state, iteration and drivers.
pub mod session;
pub use session::{ExitSignal, IterationReport, LoopState, Session};

/// Reference processor and boot ROM.
pub mod cpu;
pub use cpu::{ReferenceCpu, RomImage, RAM_SIZE, ROM_BASE, ROM_SIZE};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
