use std::ops::RangeInclusive;

use super::{BusError, Peripheral};

/// First real-time clock port.
pub const RTC_BASE: u32 = 0x8000_0700;
/// Register offset of wall time in unix seconds (low 32 bits).
pub const RTC_WALL_TIME: u32 = 0;
/// Register offset of session uptime in milliseconds.
pub const RTC_UPTIME: u32 = 1;

/// Guest-visible clock shadow, refreshed once per executed millisecond slice.
///
/// Both fields only move forward; an update that would go backwards is
/// ignored for that field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcShadow {
    wall_time: u64,
    uptime_counter: u32,
}

impl RtcShadow {
    /// Stores the host wall time in unix seconds.
    pub fn set_wall_time(&mut self, unix_seconds: u64) {
        self.wall_time = self.wall_time.max(unix_seconds);
    }

    /// Adds one millisecond to the uptime counter.
    #[allow(clippy::missing_const_for_fn)]
    pub fn tick_uptime(&mut self) {
        self.uptime_counter = self.uptime_counter.saturating_add(1);
    }

    /// Replaces the uptime counter with a host clock reading.
    pub fn set_uptime(&mut self, uptime_ms: u32) {
        self.uptime_counter = self.uptime_counter.max(uptime_ms);
    }

    /// Wall time in unix seconds.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Uptime in milliseconds.
    #[must_use]
    pub const fn uptime(&self) -> u32 {
        self.uptime_counter
    }
}

impl Peripheral for RtcShadow {
    fn ports(&self) -> RangeInclusive<u32> {
        RTC_BASE..=RTC_BASE + RTC_UPTIME
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read(&mut self, offset: u32) -> Result<u32, BusError> {
        Ok(match offset {
            RTC_WALL_TIME => self.wall_time as u32,
            _ => self.uptime_counter,
        })
    }

    fn write(&mut self, _offset: u32, _value: u32) -> Result<(), BusError> {
        Ok(())
    }
}
