use serde_repr::Serialize_repr;

/// In ARM state, every instruction is conditionally executed according to the
/// state of the CPSR condition flags and the instruction's condition field
/// (bits 31:28). If the N, Z, C and V flags fulfil the encoded predicate the
/// instruction executes, otherwise it is skipped. In the absence of a suffix
/// the field assembles to `AL` and the instruction always executes.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize_repr)]
#[repr(u8)]
pub enum Condition {
    /// Z set (equal).
    EQ = 0x0,

    /// Z clear (not equal).
    NE = 0x1,

    /// C set (unsigned higher or same).
    CS = 0x2,

    /// C clear (unsigned lower).
    CC = 0x3,

    /// N set (negative).
    MI = 0x4,

    /// N clear (positive or zero).
    PL = 0x5,

    /// V set (overflow).
    VS = 0x6,

    /// V clear (no overflow).
    VC = 0x7,

    /// C set and Z clear (unsigned higher).
    HI = 0x8,

    /// C clear or Z set (unsigned lower or same).
    LS = 0x9,

    /// N equals V (greater or equal).
    GE = 0xA,

    /// N not equal to V (less than).
    LT = 0xB,

    /// Z clear AND (N equals V) (greater than).
    GT = 0xC,

    /// Z set OR (N not equals V) (less than or equal).
    LE = 0xD,

    /// Always executed; the suffix is omitted in source.
    AL = 0xE,

    /// Never executed. Reserved from ARMv3 up, still decoded.
    NV = 0xF,
}

impl From<u8> for Condition {
    fn from(item: u8) -> Self {
        match item {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            0xF => Self::NV,
            _ => unreachable!(),
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = ();

    /// Parses a condition suffix. The empty string means `AL`.
    /// Expects uppercase input, as the assembler normalises case first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EQ" => Ok(Self::EQ),
            "NE" => Ok(Self::NE),
            "CS" | "HS" => Ok(Self::CS),
            "CC" | "LO" => Ok(Self::CC),
            "MI" => Ok(Self::MI),
            "PL" => Ok(Self::PL),
            "VS" => Ok(Self::VS),
            "VC" => Ok(Self::VC),
            "HI" => Ok(Self::HI),
            "LS" => Ok(Self::LS),
            "GE" => Ok(Self::GE),
            "LT" => Ok(Self::LT),
            "GT" => Ok(Self::GT),
            "LE" => Ok(Self::LE),
            "AL" | "" => Ok(Self::AL),
            "NV" => Ok(Self::NV),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EQ => f.write_str("EQ"),
            Self::NE => f.write_str("NE"),
            Self::CS => f.write_str("CS"),
            Self::CC => f.write_str("CC"),
            Self::MI => f.write_str("MI"),
            Self::PL => f.write_str("PL"),
            Self::VS => f.write_str("VS"),
            Self::VC => f.write_str("VC"),
            Self::HI => f.write_str("HI"),
            Self::LS => f.write_str("LS"),
            Self::GE => f.write_str("GE"),
            Self::LT => f.write_str("LT"),
            Self::GT => f.write_str("GT"),
            Self::LE => f.write_str("LE"),
            Self::AL => Ok(()),
            Self::NV => f.write_str("NV"),
        }
    }
}
