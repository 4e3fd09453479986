//! Session configuration and fixed pacing constants.

use thiserror::Error;

/// Clock rate of the emulated processor in cycles per second.
pub const DEFAULT_CPU_HZ: u32 = 33_000_000;

/// Scheduling quanta per second.
pub const DEFAULT_TICKS_PER_SECOND: u32 = 60;

/// Ticks between display updates; `1` redraws and raises vsync every tick.
pub const DEFAULT_FRAMES_PER_UPDATE: u32 = 1;

/// Interrupt vector raised once per display update.
pub const VSYNC_INTERRUPT_VECTOR: u16 = 0xFF;

/// Width of the adaptive controller's "converged" band, in percent of target.
pub const DEFAULT_TOLERANCE_PERCENT: u32 = 10;

/// Cycles the adaptive controller adds on top of every estimate.
pub const DEFAULT_AUTOADJUST_MARGIN: u32 = 1000;

/// Selects the budget policy a session is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BudgetMode {
    /// Fixed per-tick budget split evenly across elapsed milliseconds.
    #[default]
    Fixed,
    /// Feedback controller for hosts without reliable sleep.
    Adaptive,
}

/// Top-level immutable configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Target processor clock in Hz.
    pub cpu_hz: u32,
    /// Ticks per second the event loop paces itself to.
    pub ticks_per_second: u32,
    /// Ticks per display update (redraw + vsync).
    pub frames_per_update: u32,
    /// Vector raised on every display update.
    pub vsync_vector: u16,
    /// Adaptive controller tolerance band, percent of `ticks_per_second`.
    pub tolerance_percent: u32,
    /// Adaptive controller safety margin in cycles.
    pub autoadjust_margin: u32,
    /// Budget policy selection.
    pub budget_mode: BudgetMode,
    /// Logs every processor fault before recovery.
    pub debug: bool,
    /// Suppresses every redraw request.
    pub headless: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cpu_hz: DEFAULT_CPU_HZ,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            frames_per_update: DEFAULT_FRAMES_PER_UPDATE,
            vsync_vector: VSYNC_INTERRUPT_VECTOR,
            tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
            autoadjust_margin: DEFAULT_AUTOADJUST_MARGIN,
            budget_mode: BudgetMode::Fixed,
            debug: false,
            headless: false,
        }
    }
}

/// Configuration rejected by [`SessionConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    /// Ticks per second must be at least one.
    #[error("ticks_per_second must be non-zero")]
    ZeroTickRate,
    /// A tick must last at least one whole millisecond.
    #[error("ticks_per_second {0} exceeds 1000; ticks would be shorter than 1 ms")]
    TickRateTooHigh(u32),
    /// Every tick must owe the guest at least one cycle.
    #[error("cpu_hz {cpu_hz} is below ticks_per_second {ticks_per_second}")]
    ClockBelowTickRate {
        /// Configured processor clock.
        cpu_hz: u32,
        /// Configured tick rate.
        ticks_per_second: u32,
    },
}

impl SessionConfig {
    /// Checks the pacing fields the derived tick quantities divide by.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a tick would be empty or shorter than
    /// one millisecond.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_second == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.ticks_per_second > 1000 {
            return Err(ConfigError::TickRateTooHigh(self.ticks_per_second));
        }
        if self.cpu_hz < self.ticks_per_second {
            return Err(ConfigError::ClockBelowTickRate {
                cpu_hz: self.cpu_hz,
                ticks_per_second: self.ticks_per_second,
            });
        }
        Ok(())
    }

    /// Cycles owed to the guest over one full tick. Only meaningful for a
    /// config that passed [`SessionConfig::validate`].
    #[must_use]
    pub const fn cycles_per_tick(&self) -> u32 {
        self.cpu_hz / self.ticks_per_second
    }

    /// Nominal tick duration in whole milliseconds.
    #[must_use]
    pub const fn tick_duration_ms(&self) -> u64 {
        1000 / self.ticks_per_second as u64
    }
}
