//! # Program Status Registers (CPSR and SPSR)
//!
//! ```text
//! 31 30 29 28 27      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```
//!
//! - **Flags (28-31)**: tested by [`Condition`] predicates
//! - **I/F bits (6-7)**: IRQ/FIQ disable
//! - **T bit (5)**: ARM (0) or Thumb (1) state; this core only executes ARM
//! - **Mode (0-4)**: see [`Mode`]
//!
//! Each privileged exception mode has an SPSR that receives a copy of CPSR on
//! exception entry; User and System have none.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::{condition::Condition, cpu_modes::Mode};

/// A program status register (CPSR or SPSR), wrapping the raw `u32` with
/// type-safe accessors for each field.
///
/// # Example
///
/// ```
/// use emu::cpu::psr::Psr;
///
/// let mut cpsr = Psr::default();
/// cpsr.set_zero_flag(true);
/// assert!(cpsr.zero_flag());
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    /// Evaluates the given condition field against the current flags.
    #[must_use]
    pub fn can_execute(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),
            NE => !self.zero_flag(),
            CS => self.carry_flag(),
            CC => !self.carry_flag(),
            MI => self.sign_flag(),
            PL => !self.sign_flag(),
            VS => self.overflow_flag(),
            VC => !self.overflow_flag(),
            HI => self.carry_flag() && !self.zero_flag(),
            LS => !self.carry_flag() || self.zero_flag(),
            GE => self.sign_flag() == self.overflow_flag(),
            LT => self.sign_flag() != self.overflow_flag(),
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()),
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()),
            AL => true,
            NV => false,
        }
    }

    /// N => Bit 31, (0=Not Signed, 1=Signed)
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z => Bit 30, (0=Not Zero, 1=Zero)
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C => Bit 29, (0=Borrow/No Carry, 1=Carry/No Borrow)
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V => Bit 28, (0=No Overflow, 1=Overflow)
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// I => Bit 7, (0=Enable, 1=Disable)
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F => Bit 6, (0=Enable, 1=Disable)
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T => Bit 5, (0=ARM, 1=THUMB). This core stays in ARM state.
    #[must_use]
    pub fn state_bit(self) -> bool {
        self.0.get_bit(5)
    }

    /// M4-M0 => Bits 4-0. `None` when the bits name no architected mode.
    #[must_use]
    pub fn mode(self) -> Option<Mode> {
        Mode::try_from(self.0 & 0b11111).ok()
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    /// The Mode Bits M4-M0 contain the current operating mode.
    pub fn set_mode(&mut self, m: Mode) {
        self.0 = (self.0 & !0b11111) | m as u32;
    }

    /// Replace only the flag bits (31..28), as `msr cpsr_flg` does.
    pub fn set_flags_field(&mut self, value: u32) {
        self.0 = (self.0 & 0x0FFF_FFFF) | (value & 0xF000_0000);
    }

    /// One letter per set flag, e.g. `NZC` or `ZI`.
    #[must_use]
    pub fn flags_string(self) -> String {
        let mut s = String::new();
        for (set, letter) in [
            (self.sign_flag(), 'N'),
            (self.zero_flag(), 'Z'),
            (self.carry_flag(), 'C'),
            (self.overflow_flag(), 'V'),
            (self.irq_disable(), 'I'),
            (self.fiq_disable(), 'F'),
            (self.state_bit(), 'T'),
        ] {
            if set {
                s.push(letter);
            }
        }
        s
    }
}

impl From<Mode> for Psr {
    fn from(m: Mode) -> Self {
        let mut s = Self(0);
        s.set_mode(m);
        s
    }
}

impl From<u32> for Psr {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Psr> for u32 {
    fn from(p: Psr) -> Self {
        p.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_sign_flag() {
        let mut cpsr = Psr(0);
        cpsr.set_sign_flag(true);
        assert!(cpsr.sign_flag());
        assert_eq!(u32::from(cpsr), 1 << 31);
    }

    #[test]
    fn check_zero_flag() {
        let mut cpsr = Psr(0);
        cpsr.set_zero_flag(true);
        assert!(cpsr.zero_flag());
    }

    #[test]
    fn check_carry_flag() {
        let mut cpsr = Psr(0);
        cpsr.set_carry_flag(true);
        assert!(cpsr.carry_flag());
    }

    #[test]
    fn check_overflow_flag() {
        let cpsr = Psr(0b0001_0000_0000_0000_0000_0000_0000_0000);
        assert!(cpsr.overflow_flag());
    }

    #[test]
    fn check_interrupt_bits() {
        let mut cpsr = Psr(0);
        cpsr.set_irq_disable(true);
        cpsr.set_fiq_disable(true);
        assert!(cpsr.irq_disable());
        assert!(cpsr.fiq_disable());
    }

    #[test]
    fn mode_bits() {
        let mut cpsr = Psr(0);
        cpsr.set_mode(Mode::Supervisor);
        assert_eq!(u32::from(cpsr) & 0b11111, 0b10011);
        assert_eq!(cpsr.mode(), Some(Mode::Supervisor));

        let cpsr = Psr(0b10001);
        assert_eq!(cpsr.mode(), Some(Mode::Fiq));

        let cpsr = Psr(0);
        assert_eq!(cpsr.mode(), None);
    }

    #[test]
    fn flags_field_leaves_control_bits() {
        let mut cpsr = Psr::from(Mode::Irq);
        cpsr.set_irq_disable(true);
        cpsr.set_flags_field(0xF000_0000);
        assert!(cpsr.sign_flag() && cpsr.zero_flag() && cpsr.carry_flag() && cpsr.overflow_flag());
        assert!(cpsr.irq_disable());
        assert_eq!(cpsr.mode(), Some(Mode::Irq));
    }

    #[test]
    fn condition_table() {
        let mut cpsr = Psr(0);
        assert!(cpsr.can_execute(Condition::AL));
        assert!(!cpsr.can_execute(Condition::NV));
        assert!(cpsr.can_execute(Condition::NE));
        assert!(cpsr.can_execute(Condition::GE));
        assert!(cpsr.can_execute(Condition::GT));

        cpsr.set_zero_flag(true);
        assert!(cpsr.can_execute(Condition::EQ));
        assert!(cpsr.can_execute(Condition::LE));
        assert!(cpsr.can_execute(Condition::LS));
        assert!(!cpsr.can_execute(Condition::GT));

        let mut cpsr = Psr(0);
        cpsr.set_sign_flag(true);
        assert!(cpsr.can_execute(Condition::MI));
        assert!(cpsr.can_execute(Condition::LT));
        assert!(!cpsr.can_execute(Condition::GE));

        cpsr.set_overflow_flag(true);
        assert!(cpsr.can_execute(Condition::GE));
        assert!(cpsr.can_execute(Condition::VS));

        let mut cpsr = Psr(0);
        cpsr.set_carry_flag(true);
        assert!(cpsr.can_execute(Condition::CS));
        assert!(cpsr.can_execute(Condition::HI));
        assert!(!cpsr.can_execute(Condition::LS));
    }
}
