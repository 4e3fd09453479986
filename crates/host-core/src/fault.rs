use thiserror::Error;

/// Fault classes used for diagnostics aggregation and recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Instruction word could not be decoded.
    Decode,
    /// Arithmetic exception raised by an instruction.
    Arithmetic,
    /// Memory access outside the mapped address space.
    Memory,
    /// A peripheral reported a failure through the bus.
    Io,
    /// Guest asked for a debugger break.
    Debug,
    /// Recovery itself could not be delivered to the guest.
    Dispatch,
}

/// Stable processor fault taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultKind {
    /// Opcode byte does not name an instruction.
    #[error("invalid opcode")]
    InvalidOpcode = 0x01,
    /// Division or modulo by zero.
    #[error("divide by zero")]
    DivideByZero = 0x02,
    /// Data or instruction read from an unmapped address.
    #[error("memory read fault")]
    MemoryRead = 0x03,
    /// Data write to an unmapped or read-only address.
    #[error("memory write fault")]
    MemoryWrite = 0x04,
    /// Peripheral failed a port read.
    #[error("i/o read fault")]
    IoRead = 0x05,
    /// Peripheral failed a port write.
    #[error("i/o write fault")]
    IoWrite = 0x06,
    /// `BRK` executed; control belongs to a debugger.
    #[error("debugger breakpoint")]
    Breakpoint = 0x07,
    /// A fault could not be turned into a guest exception.
    #[error("fault could not be recovered")]
    CantRecover = 0x08,
}

impl FaultKind {
    /// Converts a fault kind to its stable one-byte code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns the diagnostics class for this fault kind.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::InvalidOpcode => FaultClass::Decode,
            Self::DivideByZero => FaultClass::Arithmetic,
            Self::MemoryRead | Self::MemoryWrite => FaultClass::Memory,
            Self::IoRead | Self::IoWrite => FaultClass::Io,
            Self::Breakpoint => FaultClass::Debug,
            Self::CantRecover => FaultClass::Dispatch,
        }
    }

    /// Guest exception vector that a recovering processor raises for this
    /// kind, or `None` when the kind has no guest-side handler.
    #[must_use]
    pub const fn exception_vector(self) -> Option<u16> {
        match self {
            Self::DivideByZero => Some(EXCEPTION_DIVIDE_BY_ZERO),
            Self::InvalidOpcode => Some(EXCEPTION_INVALID_OPCODE),
            Self::MemoryRead => Some(EXCEPTION_MEMORY_READ),
            Self::MemoryWrite => Some(EXCEPTION_MEMORY_WRITE),
            Self::IoRead | Self::IoWrite => Some(EXCEPTION_BUS_ERROR),
            Self::Breakpoint | Self::CantRecover => None,
        }
    }
}

/// Exception vector raised for [`FaultKind::DivideByZero`].
pub const EXCEPTION_DIVIDE_BY_ZERO: u16 = 0x100;
/// Exception vector raised for [`FaultKind::InvalidOpcode`].
pub const EXCEPTION_INVALID_OPCODE: u16 = 0x101;
/// Exception vector raised for [`FaultKind::MemoryRead`].
pub const EXCEPTION_MEMORY_READ: u16 = 0x102;
/// Exception vector raised for [`FaultKind::MemoryWrite`].
pub const EXCEPTION_MEMORY_WRITE: u16 = 0x103;
/// Exception vector raised for failed port I/O.
pub const EXCEPTION_BUS_ERROR: u16 = 0x105;

/// A processor fault: what went wrong and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{kind} at pc {pc:#010x} (operand {operand:#010x})")]
pub struct Fault {
    /// Fault taxonomy entry.
    pub kind: FaultKind,
    /// Program counter of the faulting instruction.
    pub pc: u32,
    /// Kind-specific context: opcode, address or port.
    pub operand: u32,
}

impl Fault {
    /// Creates a fault record.
    #[must_use]
    pub const fn new(kind: FaultKind, pc: u32, operand: u32) -> Self {
        Self { kind, pc, operand }
    }

    /// Escalates this fault to [`FaultKind::CantRecover`], keeping its context.
    #[must_use]
    pub const fn escalate(self) -> Self {
        Self {
            kind: FaultKind::CantRecover,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Fault, FaultClass, FaultKind};

    #[test]
    fn stable_codes_are_fixed() {
        assert_eq!(FaultKind::InvalidOpcode.as_u8(), 0x01);
        assert_eq!(FaultKind::Breakpoint.as_u8(), 0x07);
        assert_eq!(FaultKind::CantRecover.as_u8(), 0x08);
    }

    #[test]
    fn only_breakpoint_and_escalation_lack_a_guest_vector() {
        assert!(FaultKind::Breakpoint.exception_vector().is_none());
        assert!(FaultKind::CantRecover.exception_vector().is_none());
        assert!(FaultKind::InvalidOpcode.exception_vector().is_some());
        assert_eq!(
            FaultKind::IoRead.exception_vector(),
            FaultKind::IoWrite.exception_vector()
        );
    }

    #[test]
    fn class_mapping_matches_fault_taxonomy() {
        assert_eq!(FaultKind::InvalidOpcode.class(), FaultClass::Decode);
        assert_eq!(FaultKind::DivideByZero.class(), FaultClass::Arithmetic);
        assert_eq!(FaultKind::MemoryWrite.class(), FaultClass::Memory);
        assert_eq!(FaultKind::IoRead.class(), FaultClass::Io);
        assert_eq!(FaultKind::Breakpoint.class(), FaultClass::Debug);
        assert_eq!(FaultKind::CantRecover.class(), FaultClass::Dispatch);
    }

    #[test]
    fn escalation_keeps_location() {
        let fault = Fault::new(FaultKind::InvalidOpcode, 0xF000_0010, 0xEE);
        let escalated = fault.escalate();
        assert_eq!(escalated.kind, FaultKind::CantRecover);
        assert_eq!(escalated.pc, 0xF000_0010);
        assert_eq!(escalated.operand, 0xEE);
    }

    #[test]
    fn description_names_kind_and_pc() {
        let fault = Fault::new(FaultKind::DivideByZero, 0x10, 0);
        assert_eq!(
            fault.to_string(),
            "divide by zero at pc 0x00000010 (operand 0x00000000)"
        );
    }
}
