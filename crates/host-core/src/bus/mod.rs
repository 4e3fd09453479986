//! Port-addressed bus between the processor and its peripherals.
//!
//! Every peripheral owns one fixed inclusive port range, registered when the
//! adapter is built. Reads of unmapped ports return 0 and writes to them are
//! discarded; only a peripheral can make an access fail.

/// Disk image table and block controller.
pub mod disk;
/// Port-fed pixel buffer presented on redraw.
pub mod framebuffer;
/// Keyboard scancode queue and mouse state.
pub mod input;
/// Guest-visible real-time clock shadow.
pub mod rtc;
/// Byte-wide serial line.
pub mod serial;

use std::ops::RangeInclusive;

use thiserror::Error;

use self::disk::DiskController;
use self::framebuffer::Framebuffer;
use self::input::{Keyboard, Mouse};
use self::rtc::RtcShadow;
use self::serial::Serial;

/// Port that accepts power-control requests from the guest.
pub const POWER_CONTROL_PORT: u32 = 0x8001_0000;

/// Value written to [`POWER_CONTROL_PORT`] to request shutdown.
pub const POWER_OFF: u32 = 0;

/// Failure reported by a peripheral during a port access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum BusError {
    /// Peripheral could not complete a read.
    #[error("read of port {port:#010x} failed: {reason}")]
    ReadFailed {
        /// Port that was read.
        port: u32,
        /// Human-readable cause.
        reason: String,
    },
    /// Peripheral could not complete a write.
    #[error("write of {value:#010x} to port {port:#010x} failed: {reason}")]
    WriteFailed {
        /// Port that was written.
        port: u32,
        /// Value that was rejected.
        value: u32,
        /// Human-readable cause.
        reason: String,
    },
}

/// Bus contract consumed by a processor during execution.
pub trait Bus {
    /// Reads a 32-bit value from `port`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ReadFailed`] when the owning peripheral fails.
    fn read(&mut self, port: u32) -> Result<u32, BusError>;

    /// Writes a 32-bit value to `port`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::WriteFailed`] when the owning peripheral fails.
    fn write(&mut self, port: u32, value: u32) -> Result<(), BusError>;
}

/// A device that serves one fixed port range.
pub trait Peripheral {
    /// Inclusive port range this device owns.
    fn ports(&self) -> RangeInclusive<u32>;

    /// Reads the register at `offset` from the start of [`Self::ports`].
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] when the device cannot serve the access.
    fn read(&mut self, offset: u32) -> Result<u32, BusError>;

    /// Writes the register at `offset` from the start of [`Self::ports`].
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] when the device cannot serve the access.
    fn write(&mut self, offset: u32, value: u32) -> Result<(), BusError>;
}

/// Identifies the peripheral that owns a registered port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceId {
    /// Serial line.
    Serial,
    /// Framebuffer.
    Framebuffer,
    /// Mouse.
    Mouse,
    /// Keyboard.
    Keyboard,
    /// Real-time clock shadow.
    Rtc,
    /// Disk controller.
    Disk,
}

/// Registered range entry in the adapter's dispatch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Inclusive owned range.
    pub ports: RangeInclusive<u32>,
    /// Owner of the range.
    pub device: DeviceId,
}

/// Routes guest port I/O to peripherals by fixed range ownership.
#[derive(Debug)]
pub struct BusAdapter {
    serial: Serial,
    framebuffer: Framebuffer,
    mouse: Mouse,
    keyboard: Keyboard,
    rtc: RtcShadow,
    disks: DiskController,
    map: Vec<PortMapping>,
    shutdown_requested: bool,
}

impl BusAdapter {
    /// Builds the adapter and registers every peripheral's range.
    #[must_use]
    pub fn new(serial: Serial, disks: DiskController) -> Self {
        let mut bus = Self {
            serial,
            framebuffer: Framebuffer::default(),
            mouse: Mouse::default(),
            keyboard: Keyboard::default(),
            rtc: RtcShadow::default(),
            disks,
            map: Vec::new(),
            shutdown_requested: false,
        };
        bus.map = vec![
            PortMapping {
                ports: bus.serial.ports(),
                device: DeviceId::Serial,
            },
            PortMapping {
                ports: bus.framebuffer.ports(),
                device: DeviceId::Framebuffer,
            },
            PortMapping {
                ports: bus.mouse.ports(),
                device: DeviceId::Mouse,
            },
            PortMapping {
                ports: bus.keyboard.ports(),
                device: DeviceId::Keyboard,
            },
            PortMapping {
                ports: bus.rtc.ports(),
                device: DeviceId::Rtc,
            },
            PortMapping {
                ports: bus.disks.ports(),
                device: DeviceId::Disk,
            },
        ];
        bus
    }

    /// Returns the registered dispatch table.
    #[must_use]
    pub fn port_map(&self) -> &[PortMapping] {
        &self.map
    }

    /// Finds the owner of `port` and the offset into its range.
    #[must_use]
    pub fn route(&self, port: u32) -> Option<(DeviceId, u32)> {
        self.map
            .iter()
            .find(|mapping| mapping.ports.contains(&port))
            .map(|mapping| (mapping.device, port - mapping.ports.start()))
    }

    fn device_mut(&mut self, device: DeviceId) -> &mut dyn Peripheral {
        match device {
            DeviceId::Serial => &mut self.serial,
            DeviceId::Framebuffer => &mut self.framebuffer,
            DeviceId::Mouse => &mut self.mouse,
            DeviceId::Keyboard => &mut self.keyboard,
            DeviceId::Rtc => &mut self.rtc,
            DeviceId::Disk => &mut self.disks,
        }
    }

    /// Returns `true` once the guest has written [`POWER_OFF`] to
    /// [`POWER_CONTROL_PORT`].
    #[must_use]
    pub const fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Serial line.
    #[must_use]
    pub const fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Mutable serial line, for host-side input.
    #[allow(clippy::missing_const_for_fn)]
    pub fn serial_mut(&mut self) -> &mut Serial {
        &mut self.serial
    }

    /// Framebuffer presented on redraw.
    #[must_use]
    pub const fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Mouse state.
    #[allow(clippy::missing_const_for_fn)]
    pub fn mouse_mut(&mut self) -> &mut Mouse {
        &mut self.mouse
    }

    /// Keyboard queue.
    #[allow(clippy::missing_const_for_fn)]
    pub fn keyboard_mut(&mut self) -> &mut Keyboard {
        &mut self.keyboard
    }

    /// Real-time clock shadow.
    #[must_use]
    pub const fn rtc(&self) -> &RtcShadow {
        &self.rtc
    }

    /// Mutable real-time clock shadow, advanced by the event loop.
    #[allow(clippy::missing_const_for_fn)]
    pub fn rtc_mut(&mut self) -> &mut RtcShadow {
        &mut self.rtc
    }

    /// Disk controller.
    #[must_use]
    pub const fn disks(&self) -> &DiskController {
        &self.disks
    }

    /// Mutable disk controller.
    #[allow(clippy::missing_const_for_fn)]
    pub fn disks_mut(&mut self) -> &mut DiskController {
        &mut self.disks
    }
}

impl Bus for BusAdapter {
    fn read(&mut self, port: u32) -> Result<u32, BusError> {
        match self.route(port) {
            Some((device, offset)) => self.device_mut(device).read(offset),
            None => {
                tracing::trace!(port, "read from unmapped port");
                Ok(0)
            }
        }
    }

    fn write(&mut self, port: u32, value: u32) -> Result<(), BusError> {
        if port == POWER_CONTROL_PORT {
            if value == POWER_OFF {
                tracing::info!("guest requested power off");
                self.shutdown_requested = true;
            }
            return Ok(());
        }
        match self.route(port) {
            Some((device, offset)) => self.device_mut(device).write(offset, value),
            None => {
                tracing::trace!(port, value, "write to unmapped port discarded");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::disk::DiskController;
    use super::serial::Serial;
    use super::{Bus, BusAdapter, DeviceId, POWER_CONTROL_PORT, POWER_OFF};

    fn adapter() -> BusAdapter {
        BusAdapter::new(Serial::buffered(), DiskController::default())
    }

    #[test]
    fn registered_ranges_do_not_overlap() {
        let bus = adapter();
        let map = bus.port_map();
        for (index, a) in map.iter().enumerate() {
            for b in &map[index + 1..] {
                let overlap = a.ports.start() <= b.ports.end() && b.ports.start() <= a.ports.end();
                assert!(!overlap, "{a:?} overlaps {b:?}");
            }
        }
        assert!(map.iter().all(|m| !m.ports.contains(&POWER_CONTROL_PORT)));
    }

    #[rstest]
    #[case(0x0000_0000, Some((DeviceId::Serial, 0)))]
    #[case(0x8000_0001, Some((DeviceId::Framebuffer, 1)))]
    #[case(0x8000_0401, Some((DeviceId::Mouse, 1)))]
    #[case(0x8000_0500, Some((DeviceId::Keyboard, 0)))]
    #[case(0x8000_0701, Some((DeviceId::Rtc, 1)))]
    #[case(0x8000_1002, Some((DeviceId::Disk, 0x2)))]
    #[case(0x8000_6000, None)]
    #[case(0x1234_5678, None)]
    fn routing_resolves_owner_and_offset(
        #[case] port: u32,
        #[case] expected: Option<(DeviceId, u32)>,
    ) {
        assert_eq!(adapter().route(port), expected);
    }

    #[test]
    fn unmapped_ports_are_total() {
        let mut bus = adapter();
        assert_eq!(bus.read(0xDEAD_BEEF), Ok(0));
        assert_eq!(bus.write(0xDEAD_BEEF, 7), Ok(()));
    }

    #[test]
    fn power_off_write_sets_shutdown_flag() {
        let mut bus = adapter();
        bus.write(POWER_CONTROL_PORT, 1).expect("power port is total");
        assert!(!bus.shutdown_requested());

        bus.write(POWER_CONTROL_PORT, POWER_OFF)
            .expect("power port is total");
        assert!(bus.shutdown_requested());
    }

    #[test]
    fn serial_writes_reach_the_sink() {
        let mut bus = adapter();
        for byte in b"ok" {
            bus.write(0x0000_0000, u32::from(*byte))
                .expect("serial write");
        }
        assert_eq!(bus.serial().captured(), b"ok");
    }
}
