//! # ARM7TDMI Register File
//!
//! The processor exposes 16 registers at any time, but several of them are
//! **different physical registers** depending on the operating mode. This is
//! called register banking:
//!
//! ```text
//! ┌──────────┬─────────────────────────────────────────────────────────────┐
//! │ Register │ Banking                                                     │
//! ├──────────┼─────────────────────────────────────────────────────────────┤
//! │ R0-R7    │ Never banked. Same physical register in every mode.         │
//! │ R8-R12   │ Banked only in FIQ mode.                                    │
//! │ R13 (SP) │ Banked in every exception mode; USR and SYS share one bank. │
//! │ R14 (LR) │ Banked in every exception mode; USR and SYS share one bank. │
//! │ R15 (PC) │ Never banked.                                               │
//! └──────────┴─────────────────────────────────────────────────────────────┘
//! ```
//!
//! In total there are **37 physical registers**: 31 general registers, the
//! CPSR and five SPSRs. They live in one flat array here and a routing table
//! maps (visible register, mode) to a slot, so a mode change needs no copying
//! and takes effect immediately.
//!
//! The flat array is also the shape the host sees through the `registers`
//! query. The slot order is an implementation contract with one fixed point:
//! **the CPSR occupies slot 31**.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;

/// Stack Pointer register index.
pub const REG_SP: u32 = 0xD;

/// Link Register index (return address for subroutines).
pub const REG_LR: u32 = 0xE;

/// Program Counter register index.
pub const REG_PC: u32 = 0xF;

/// Number of physical registers (31 general + CPSR + 5 SPSR).
pub const PHYSICAL_REGISTERS: usize = 37;

/// One slot of the physical register file.
///
/// The discriminants are the slot indices of the flat array; `Cpsr` is pinned
/// at 31 by the host contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum PhysicalRegister {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    R8Fiq,
    R9Fiq,
    R10Fiq,
    R11Fiq,
    R12Fiq,
    R13Fiq,
    R14Fiq,
    R13Irq,
    R14Irq,
    R13Svc,
    R14Svc,
    R13Abt,
    R14Abt,
    R13Und,
    R14Und,
    Cpsr,
    SpsrFiq,
    SpsrIrq,
    SpsrSvc,
    SpsrAbt,
    SpsrUnd,
}

/// Routes a visible register index (0..=15) to its physical slot in `mode`.
#[must_use]
pub fn physical(reg: u32, mode: Mode) -> PhysicalRegister {
    use PhysicalRegister::*;

    debug_assert!(reg <= 15, "invalid register index: {reg}");

    match (reg, mode) {
        (8, Mode::Fiq) => R8Fiq,
        (9, Mode::Fiq) => R9Fiq,
        (10, Mode::Fiq) => R10Fiq,
        (11, Mode::Fiq) => R11Fiq,
        (12, Mode::Fiq) => R12Fiq,
        (13, Mode::Fiq) => R13Fiq,
        (13, Mode::Irq) => R13Irq,
        (13, Mode::Supervisor) => R13Svc,
        (13, Mode::Abort) => R13Abt,
        (13, Mode::Undefined) => R13Und,
        (14, Mode::Fiq) => R14Fiq,
        (14, Mode::Irq) => R14Irq,
        (14, Mode::Supervisor) => R14Svc,
        (14, Mode::Abort) => R14Abt,
        (14, Mode::Undefined) => R14Und,
        _ => match reg {
            0 => R0,
            1 => R1,
            2 => R2,
            3 => R3,
            4 => R4,
            5 => R5,
            6 => R6,
            7 => R7,
            8 => R8,
            9 => R9,
            10 => R10,
            11 => R11,
            12 => R12,
            13 => R13,
            14 => R14,
            _ => R15,
        },
    }
}

/// The SPSR slot for a privileged mode; `None` in USR/SYS.
#[must_use]
pub fn spsr_slot(mode: Mode) -> Option<PhysicalRegister> {
    match mode {
        Mode::User | Mode::System => None,
        Mode::Fiq => Some(PhysicalRegister::SpsrFiq),
        Mode::Irq => Some(PhysicalRegister::SpsrIrq),
        Mode::Supervisor => Some(PhysicalRegister::SpsrSvc),
        Mode::Abort => Some(PhysicalRegister::SpsrAbt),
        Mode::Undefined => Some(PhysicalRegister::SpsrUnd),
    }
}

/// The 37 physical registers of the processor.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs: [u32; PHYSICAL_REGISTERS],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            regs: [0; PHYSICAL_REGISTERS],
        }
    }
}

impl Serialize for RegisterFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("RegisterFile", 1)?;
        state.serialize_field("regs", self.regs.as_slice())?;
        state.end()
    }
}

impl RegisterFile {
    #[must_use]
    pub fn get_physical(&self, slot: PhysicalRegister) -> u32 {
        self.regs[slot as usize]
    }

    pub fn set_physical(&mut self, slot: PhysicalRegister, value: u32) {
        self.regs[slot as usize] = value;
    }

    /// Value of the visible register `reg` in `mode`.
    #[must_use]
    pub fn get(&self, reg: u32, mode: Mode) -> u32 {
        self.get_physical(physical(reg, mode))
    }

    pub fn set(&mut self, reg: u32, mode: Mode, value: u32) {
        self.set_physical(physical(reg, mode), value);
    }

    #[must_use]
    pub fn program_counter(&self) -> u32 {
        self.regs[PhysicalRegister::R15 as usize]
    }

    pub fn set_program_counter(&mut self, new_value: u32) {
        self.regs[PhysicalRegister::R15 as usize] = new_value;
    }

    #[must_use]
    pub fn cpsr(&self) -> Psr {
        Psr::from(self.regs[PhysicalRegister::Cpsr as usize])
    }

    pub fn set_cpsr(&mut self, psr: Psr) {
        self.regs[PhysicalRegister::Cpsr as usize] = psr.into();
    }

    /// The SPSR of `mode`, or `None` in USR/SYS where no SPSR exists.
    #[must_use]
    pub fn spsr(&self, mode: Mode) -> Option<Psr> {
        spsr_slot(mode).map(|slot| Psr::from(self.get_physical(slot)))
    }

    /// Writes the SPSR of `mode`. Returns false in USR/SYS.
    pub fn set_spsr(&mut self, mode: Mode, psr: Psr) -> bool {
        match spsr_slot(mode) {
            Some(slot) => {
                self.set_physical(slot, psr.into());
                true
            }
            None => false,
        }
    }

    /// Zeroes all 37 slots.
    pub fn clear(&mut self) {
        self.regs = [0; PHYSICAL_REGISTERS];
    }

    /// Flat snapshot for the host: slots 0..=15 hold the current-mode view of
    /// R0-R15, the remaining slots mirror the physical banks (CPSR at 31).
    #[must_use]
    pub fn snapshot(&self, mode: Mode) -> [u32; PHYSICAL_REGISTERS] {
        let mut view = self.regs;
        for reg in 0..16 {
            view[reg as usize] = self.get(reg, mode);
        }
        view
    }
}
