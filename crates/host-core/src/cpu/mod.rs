//! Reference processor used by the runner and the test suites.
//!
//! Sixteen 32-bit registers (`r15` is the stack pointer), RAM at address 0,
//! a read-only ROM window at [`ROM_BASE`], and an interrupt vector table of
//! 32-bit handler addresses at the start of RAM. Entering a handler pushes
//! the return address and the interrupt-enable flag and masks interrupts;
//! `IRET` undoes it.
//!
//! Faults that have a guest exception vector are recovered by raising that
//! exception. Recovery fails, escalating to [`FaultKind::CantRecover`], when
//! the guest has interrupts masked or the handler cannot be entered.
//! Breakpoints are never recovered.

/// Instruction encoding and cycle costs.
pub mod isa;

use std::io::{self, Read};

use self::isa::{Instruction, Opcode, FAULT_CYCLES};
use crate::bus::Bus;
use crate::config::VSYNC_INTERRUPT_VECTOR;
use crate::engine::{Processor, RaiseError, RunOutcome};
use crate::fault::{Fault, FaultKind};

/// Start of the read-only ROM window.
pub const ROM_BASE: u32 = 0xF000_0000;
/// Fixed ROM image size in bytes.
pub const ROM_SIZE: usize = 0x0008_0000;
/// RAM size in bytes, mapped from address 0.
pub const RAM_SIZE: usize = 0x0010_0000;
/// Register used as the stack pointer.
pub const STACK_REGISTER: usize = 15;
/// Number of general-purpose registers.
pub const REGISTER_COUNT: usize = 16;

const HANDLER_OFFSET: usize = 0x100;
const BOOT_BANNER: &[u8] = b"host-core boot rom\n";

/// Fixed-size boot ROM image.
#[derive(Clone, PartialEq, Eq)]
pub struct RomImage {
    bytes: Box<[u8]>,
}

impl std::fmt::Debug for RomImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RomImage")
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl Default for RomImage {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RomImage {
    /// Zero-filled ROM with `bytes` copied to the start (truncated to
    /// [`ROM_SIZE`]).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut image = vec![0; ROM_SIZE].into_boxed_slice();
        let len = bytes.len().min(ROM_SIZE);
        image[..len].copy_from_slice(&bytes[..len]);
        Self { bytes: image }
    }

    /// Assembles `program` from the start of the ROM.
    #[must_use]
    pub fn from_program(program: &[Instruction]) -> Self {
        let bytes: Vec<u8> = program
            .iter()
            .flat_map(|instruction| instruction.encode().to_le_bytes())
            .collect();
        Self::from_bytes(&bytes)
    }

    /// Built-in boot ROM.
    ///
    /// Prints a banner on the serial line, installs a vsync handler that
    /// streams one pixel per frame into the framebuffer, enables interrupts
    /// and halts until the next interrupt, forever.
    #[must_use]
    pub fn builtin() -> Self {
        let handler = ROM_BASE + u32::try_from(HANDLER_OFFSET).unwrap_or_default();
        let vsync_slot = u32::from(VSYNC_INTERRUPT_VECTOR) * 4;

        let mut boot = vec![
            Instruction::new(Opcode::Movi, 1, 0, low_half(handler)),
            Instruction::new(Opcode::Movhi, 1, 0, high_half(handler)),
            Instruction::new(Opcode::Movi, 2, 0, low_half(vsync_slot)),
            Instruction::new(Opcode::Store, 2, 1, 0),
        ];
        for byte in BOOT_BANNER {
            boot.push(Instruction::new(Opcode::Movi, 3, 0, u16::from(*byte)));
            boot.push(Instruction::new(Opcode::Out, 0, 3, 0));
        }
        boot.extend([
            Instruction::new(Opcode::Movi, 4, 0, 0),
            Instruction::new(Opcode::Movhi, 4, 0, 0x8000),
            Instruction::new(Opcode::Out, 4, 0, 0),
            Instruction::new(Opcode::Movi, 5, 0, 1),
            Instruction::new(Opcode::Movhi, 5, 0, 0x8000),
            Instruction::new(Opcode::Movi, 6, 0, 0x8040),
            Instruction::new(Opcode::Movhi, 6, 0, 0x0020),
            Instruction::new(Opcode::Ise, 0, 0, 0),
            Instruction::new(Opcode::Halt, 0, 0, 0),
            Instruction::new(Opcode::Jmp, 0, 0, 0xFFFE),
        ]);
        debug_assert!(boot.len() * 4 <= HANDLER_OFFSET);

        let vsync_handler = [
            Instruction::new(Opcode::Out, 5, 6, 0),
            Instruction::new(Opcode::Addi, 6, 0, 1),
            Instruction::new(Opcode::Iret, 0, 0, 0),
        ];

        let mut image = Self::from_program(&boot);
        for (index, instruction) in vsync_handler.iter().enumerate() {
            let at = HANDLER_OFFSET + index * 4;
            image.bytes[at..at + 4].copy_from_slice(&instruction.encode().to_le_bytes());
        }
        image
    }

    /// Overwrites the image with up to [`ROM_SIZE`] bytes from `reader`.
    /// A short source leaves the tail of the current image in place.
    ///
    /// # Errors
    ///
    /// Propagates read errors; bytes read before the error stay applied.
    pub fn overlay(&mut self, reader: &mut impl Read) -> io::Result<usize> {
        let mut filled = 0;
        while filled < ROM_SIZE {
            match reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        Ok(filled)
    }

    /// Raw image bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn low_half(value: u32) -> u16 {
    value as u16
}

const fn high_half(value: u32) -> u16 {
    low_half(value >> 16)
}

/// Reference implementation of [`Processor`].
#[derive(Clone)]
pub struct ReferenceCpu {
    registers: [u32; REGISTER_COUNT],
    pc: u32,
    halted: bool,
    interrupts_enabled: bool,
    ram: Box<[u8]>,
    rom: RomImage,
}

impl std::fmt::Debug for ReferenceCpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCpu")
            .field("registers", &self.registers)
            .field("pc", &format_args!("{:#010x}", self.pc))
            .field("halted", &self.halted)
            .field("interrupts_enabled", &self.interrupts_enabled)
            .finish_non_exhaustive()
    }
}

impl ReferenceCpu {
    /// Resets a processor that boots from `rom`.
    #[must_use]
    pub fn new(rom: RomImage) -> Self {
        let mut registers = [0; REGISTER_COUNT];
        registers[STACK_REGISTER] = u32::try_from(RAM_SIZE).unwrap_or(u32::MAX);
        Self {
            registers,
            pc: ROM_BASE,
            halted: false,
            interrupts_enabled: false,
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
            rom,
        }
    }

    /// Program counter.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// General-purpose register `index` (masked to 0..16).
    #[must_use]
    pub const fn register(&self, index: usize) -> u32 {
        self.registers[index % REGISTER_COUNT]
    }

    /// Returns `true` when interrupts are enabled.
    #[must_use]
    pub const fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Reads a little-endian word from RAM or ROM.
    #[must_use]
    pub fn read_word(&self, address: u32) -> Option<u32> {
        let (memory, offset) = if address >= ROM_BASE {
            (self.rom.as_bytes(), (address - ROM_BASE) as usize)
        } else {
            (&*self.ram, address as usize)
        };
        let bytes = memory.get(offset..offset.checked_add(4)?)?;
        let mut word = [0; 4];
        word.copy_from_slice(bytes);
        Some(u32::from_le_bytes(word))
    }

    fn write_word(&mut self, address: u32, value: u32) -> Option<()> {
        let offset = address as usize;
        self.ram
            .get_mut(offset..offset.checked_add(4)?)?
            .copy_from_slice(&value.to_le_bytes());
        Some(())
    }

    fn pop(&mut self, pc: u32) -> Result<u32, Fault> {
        let sp = self.registers[STACK_REGISTER];
        let value = self
            .read_word(sp)
            .ok_or_else(|| Fault::new(FaultKind::MemoryRead, pc, sp))?;
        self.registers[STACK_REGISTER] = sp.wrapping_add(4);
        Ok(value)
    }

    fn execute(
        &mut self,
        instruction: Instruction,
        pc: u32,
        bus: &mut dyn Bus,
    ) -> Result<(), Fault> {
        let rd = usize::from(instruction.rd);
        let rs = usize::from(instruction.rs);
        let imm = u32::from(instruction.imm);
        let branch_target = self.pc.wrapping_add(instruction.simm().wrapping_mul(4));

        match instruction.opcode {
            Opcode::Nop => {}
            Opcode::Halt => self.halted = true,
            Opcode::Movi => self.registers[rd] = imm,
            Opcode::Movhi => self.registers[rd] = (self.registers[rd] & 0xFFFF) | (imm << 16),
            Opcode::Mov => self.registers[rd] = self.registers[rs],
            Opcode::Add => self.registers[rd] = self.registers[rd].wrapping_add(self.registers[rs]),
            Opcode::Sub => self.registers[rd] = self.registers[rd].wrapping_sub(self.registers[rs]),
            Opcode::Div => {
                let divisor = self.registers[rs];
                if divisor == 0 {
                    return Err(Fault::new(FaultKind::DivideByZero, pc, 0));
                }
                self.registers[rd] /= divisor;
            }
            Opcode::Addi => {
                self.registers[rd] = self.registers[rd].wrapping_add(instruction.simm());
            }
            Opcode::Jmp => self.pc = branch_target,
            Opcode::Bnz => {
                if self.registers[rd] != 0 {
                    self.pc = branch_target;
                }
            }
            Opcode::Bz => {
                if self.registers[rd] == 0 {
                    self.pc = branch_target;
                }
            }
            Opcode::In => {
                let port = self.registers[rs];
                self.registers[rd] = bus.read(port).map_err(|error| {
                    tracing::debug!(%error, "port read failed");
                    Fault::new(FaultKind::IoRead, pc, port)
                })?;
            }
            Opcode::Out => {
                let port = self.registers[rd];
                bus.write(port, self.registers[rs]).map_err(|error| {
                    tracing::debug!(%error, "port write failed");
                    Fault::new(FaultKind::IoWrite, pc, port)
                })?;
            }
            Opcode::Load => {
                let address = self.registers[rs];
                self.registers[rd] = self
                    .read_word(address)
                    .ok_or_else(|| Fault::new(FaultKind::MemoryRead, pc, address))?;
            }
            Opcode::Store => {
                let address = self.registers[rd];
                self.write_word(address, self.registers[rs])
                    .ok_or_else(|| Fault::new(FaultKind::MemoryWrite, pc, address))?;
            }
            Opcode::Ise => self.interrupts_enabled = true,
            Opcode::Icl => self.interrupts_enabled = false,
            Opcode::Iret => {
                let enabled = self.pop(pc)?;
                let return_pc = self.pop(pc)?;
                self.interrupts_enabled = enabled != 0;
                self.pc = return_pc;
            }
            Opcode::Brk => return Err(Fault::new(FaultKind::Breakpoint, pc, 0)),
        }
        Ok(())
    }
}

impl Processor for ReferenceCpu {
    fn run(&mut self, budget: u32, bus: &mut dyn Bus) -> RunOutcome {
        let mut executed = 0;

        while executed < budget && !self.halted {
            let pc = self.pc;
            let Some(word) = self.read_word(pc) else {
                self.pc = pc.wrapping_add(4);
                return RunOutcome::faulted(
                    executed + FAULT_CYCLES,
                    Fault::new(FaultKind::MemoryRead, pc, pc),
                );
            };
            let instruction = match Instruction::decode(word) {
                Ok(instruction) => instruction,
                Err(opcode) => {
                    self.pc = pc.wrapping_add(4);
                    return RunOutcome::faulted(
                        executed + FAULT_CYCLES,
                        Fault::new(FaultKind::InvalidOpcode, pc, u32::from(opcode)),
                    );
                }
            };

            let cost = instruction.opcode.cycles();
            if cost > budget - executed {
                break;
            }

            self.pc = pc.wrapping_add(4);
            executed += cost;
            if let Err(fault) = self.execute(instruction, pc, bus) {
                return RunOutcome::faulted(executed, fault);
            }
        }

        RunOutcome::completed(executed)
    }

    fn recover(&mut self, fault: Fault) -> Option<Fault> {
        let Some(vector) = fault.kind.exception_vector() else {
            return Some(fault);
        };
        match self.raise(vector) {
            Ok(()) => None,
            Err(error) => {
                tracing::debug!(%fault, %error, "exception could not be delivered");
                Some(fault.escalate())
            }
        }
    }

    fn raise(&mut self, vector: u16) -> Result<(), RaiseError> {
        if !self.interrupts_enabled {
            return Err(RaiseError::Masked);
        }
        let slot = u32::from(vector) * 4;
        let handler = self
            .read_word(slot)
            .ok_or(RaiseError::Entry(Fault::new(FaultKind::MemoryRead, self.pc, slot)))?;

        let pc = self.pc;
        let sp = self.registers[STACK_REGISTER];
        if sp < 8 || sp as usize > RAM_SIZE {
            return Err(RaiseError::Entry(Fault::new(
                FaultKind::MemoryWrite,
                pc,
                sp.wrapping_sub(8),
            )));
        }
        let (return_slot, flags_slot) = (sp - 4, sp - 8);
        for (address, value) in [(return_slot, pc), (flags_slot, 1)] {
            self.write_word(address, value).ok_or(RaiseError::Entry(Fault::new(
                FaultKind::MemoryWrite,
                pc,
                address,
            )))?;
        }

        self.registers[STACK_REGISTER] = flags_slot;
        self.interrupts_enabled = false;
        self.halted = false;
        self.pc = handler;
        Ok(())
    }

    fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    fn halted(&self) -> bool {
        self.halted
    }
}
