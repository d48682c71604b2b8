use serde_repr::Serialize_repr;

/// The seven ARM7TDMI operating modes, as encoded in CPSR bits 4..0.
///
/// ```text
/// ┌─────────────┬──────────┬───────────────────────────────────────────────┐
/// │    Mode     │  Binary  │                  Purpose                      │
/// ├─────────────┼──────────┼───────────────────────────────────────────────┤
/// │ User        │  10000   │ Normal program execution (unprivileged)       │
/// │ FIQ         │  10001   │ Fast interrupt handling                       │
/// │ IRQ         │  10010   │ General interrupt handling                    │
/// │ Supervisor  │  10011   │ Protected mode (software interrupt entry)     │
/// │ Abort       │  10111   │ Memory access failures                        │
/// │ Undefined   │  11011   │ Undefined instruction handling                │
/// │ System      │  11111   │ Privileged mode sharing User registers        │
/// └─────────────┴──────────┴───────────────────────────────────────────────┘
/// ```
///
/// Any other bit pattern leaves the processor without a definite mode; see
/// [`Psr::mode`](super::psr::Psr::mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum Mode {
    User = 0b10000,
    Fiq = 0b10001,
    Irq = 0b10010,
    Supervisor = 0b10011,
    Abort = 0b10111,
    Undefined = 0b11011,
    System = 0b11111,
}

impl Mode {
    /// User is the only unprivileged mode.
    #[must_use]
    pub fn is_privileged(self) -> bool {
        self != Self::User
    }

    /// User and System share one register bank and have no SPSR.
    #[must_use]
    pub fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}

impl TryFrom<u32> for Mode {
    type Error = u32;

    fn try_from(mode_bits: u32) -> Result<Self, Self::Error> {
        match mode_bits & 0b11111 {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("usr"),
            Self::Fiq => f.write_str("fiq"),
            Self::Irq => f.write_str("irq"),
            Self::Supervisor => f.write_str("svc"),
            Self::Abort => f.write_str("abt"),
            Self::Undefined => f.write_str("und"),
            Self::System => f.write_str("sys"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_mode() {
        for mode in [
            Mode::User,
            Mode::Fiq,
            Mode::Irq,
            Mode::Supervisor,
            Mode::Abort,
            Mode::Undefined,
            Mode::System,
        ] {
            assert_eq!(Mode::try_from(mode as u32), Ok(mode));
        }
    }

    #[test]
    fn rejects_unassigned_patterns() {
        assert_eq!(Mode::try_from(0b00000), Err(0b00000));
        assert_eq!(Mode::try_from(0b10100), Err(0b10100));
        assert_eq!(Mode::try_from(0b11110), Err(0b11110));
    }

    #[test]
    fn spsr_presence() {
        assert!(!Mode::User.has_spsr());
        assert!(!Mode::System.has_spsr());
        assert!(Mode::Fiq.has_spsr());
        assert!(Mode::Supervisor.has_spsr());
    }
}
