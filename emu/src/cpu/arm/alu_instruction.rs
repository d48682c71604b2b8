use serde::Serialize;

use crate::bitwise::Bits;

/// ALU opcode field (bits 24..21) of a data processing instruction.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ArmModeAluInstruction {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

/// Logical operations take C from the barrel shifter and leave V alone;
/// arithmetic operations compute C and V from the 33-bit sum.
#[derive(Debug, PartialEq, Eq)]
pub enum AluInstructionKind {
    Logical,
    Arithmetic,
}

impl ArmModeAluInstruction {
    #[must_use]
    pub const fn kind(self) -> AluInstructionKind {
        use ArmModeAluInstruction::*;
        match self {
            And | Eor | Tst | Teq | Orr | Mov | Bic | Mvn => AluInstructionKind::Logical,
            Sub | Rsb | Add | Adc | Sbc | Rsc | Cmp | Cmn => AluInstructionKind::Arithmetic,
        }
    }

    /// TST, TEQ, CMP and CMN update flags but write no destination.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        use ArmModeAluInstruction::*;
        matches!(self, Tst | Teq | Cmp | Cmn)
    }
}

impl From<u32> for ArmModeAluInstruction {
    fn from(alu_op_code: u32) -> Self {
        use ArmModeAluInstruction::*;
        match alu_op_code {
            0x0 => And,
            0x1 => Eor,
            0x2 => Sub,
            0x3 => Rsb,
            0x4 => Add,
            0x5 => Adc,
            0x6 => Sbc,
            0x7 => Rsc,
            0x8 => Tst,
            0x9 => Teq,
            0xA => Cmp,
            0xB => Cmn,
            0xC => Orr,
            0xD => Mov,
            0xE => Bic,
            0xF => Mvn,
            _ => unreachable!(),
        }
    }
}

impl std::fmt::Display for ArmModeAluInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("{self:?}").to_uppercase())
    }
}

/// The five shift operations of the barrel shifter.
///
/// RRX has no amount of its own: the decoder rewrites `ROR #0` into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
    Rrx,
}

impl From<u32> for ShiftKind {
    fn from(shift_type: u32) -> Self {
        match shift_type & 0b11 {
            0b00 => Self::Lsl,
            0b01 => Self::Lsr,
            0b10 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

impl std::fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lsl => f.write_str("LSL"),
            Self::Lsr => f.write_str("LSR"),
            Self::Asr => f.write_str("ASR"),
            Self::Ror => f.write_str("ROR"),
            Self::Rrx => f.write_str("RRX"),
        }
    }
}

/// Where the shift amount of a register operand comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOperator {
    /// A 5-bit amount from the instruction. `LSR/ASR #0` arrive here already
    /// expanded to 32.
    Immediate(u32),

    /// The bottom byte of a register.
    Register(u32),
}

/// Operand 2 of a data processing instruction as decoded from bits 11..0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluSecondOperandInfo {
    /// An 8-bit value rotated right by an even amount.
    Immediate { base: u32, shift: u32 },

    /// A register routed through the barrel shifter.
    Register {
        register: u32,
        shift_kind: ShiftKind,
        shift_op: ShiftOperator,
    },
}

impl AluSecondOperandInfo {
    /// Register-specified shift amounts stretch the instruction by one
    /// internal cycle and make R15 reads observe `pc + 12`.
    #[must_use]
    pub const fn is_register_specified_shift(self) -> bool {
        matches!(
            self,
            Self::Register {
                shift_op: ShiftOperator::Register(_),
                ..
            }
        )
    }
}

/// Output of the barrel shifter: the shifted value and the carry-out that a
/// logical instruction with `S` set will put into CPSR.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftOutput {
    pub value: u32,
    pub carry: bool,
}

/// Performs the action of the barrel shifter.
///
/// `amount` is the already-expanded shift amount: the decoder rewrites the
/// special encodings (`LSR #0` and `ASR #0` mean 32, `ROR #0` means RRX), and
/// register-specified amounts pass through unclamped (0..=255). An amount of
/// zero always leaves the value untouched with `carry` as carry-out, which
/// covers both `LSL #0` and a register-specified amount of zero.
#[must_use]
pub fn shift(kind: ShiftKind, amount: u32, value: u32, carry: bool) -> ShiftOutput {
    match (kind, amount) {
        (ShiftKind::Rrx, _) => ShiftOutput {
            value: (value >> 1) | (u32::from(carry) << 31),
            carry: value.get_bit(0),
        },
        (_, 0) => ShiftOutput { value, carry },
        (ShiftKind::Lsl, 1..=31) => ShiftOutput {
            value: value << amount,
            carry: value.get_bit((32 - amount) as u8),
        },
        (ShiftKind::Lsl, 32) => ShiftOutput {
            value: 0,
            carry: value.get_bit(0),
        },
        (ShiftKind::Lsl, _) => ShiftOutput {
            value: 0,
            carry: false,
        },
        (ShiftKind::Lsr, 1..=31) => ShiftOutput {
            value: value >> amount,
            carry: value.get_bit((amount - 1) as u8),
        },
        (ShiftKind::Lsr, 32) => ShiftOutput {
            value: 0,
            carry: value.get_bit(31),
        },
        (ShiftKind::Lsr, _) => ShiftOutput {
            value: 0,
            carry: false,
        },
        (ShiftKind::Asr, 1..=31) => ShiftOutput {
            value: ((value as i32) >> amount) as u32,
            carry: value.get_bit((amount - 1) as u8),
        },
        // ASR by 32 or more saturates to the sign bit.
        (ShiftKind::Asr, _) => ShiftOutput {
            value: ((value as i32) >> 31) as u32,
            carry: value.get_bit(31),
        },
        (ShiftKind::Ror, _) => {
            let rotation = amount % 32;
            if rotation == 0 {
                // A multiple of 32: value unchanged, carry from bit 31.
                ShiftOutput {
                    value,
                    carry: value.get_bit(31),
                }
            } else {
                ShiftOutput {
                    value: value.rotate_right(rotation),
                    carry: value.get_bit((rotation - 1) as u8),
                }
            }
        }
    }
}

/// The result of an ALU operation together with the flag values it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithmeticOpResult {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
    pub sign: bool,
    pub zero: bool,
}

/// Computes `a + b + carry_in` through a 33-bit sum.
///
/// Every arithmetic instruction reduces to this: ADD is `a + b + 0`,
/// SUB is `a + !b + 1`, SBC is `a + !b + C`, and so on. The carry out of
/// bit 32 becomes C (NOT borrow for the subtractive forms) and signed
/// overflow of the same sum becomes V.
#[must_use]
pub fn add_with_carry(a: u32, b: u32, carry_in: bool) -> ArithmeticOpResult {
    let wide = u64::from(a) + u64::from(b) + u64::from(carry_in);
    let result = wide as u32;

    let sign_a = a.get_bit(31);
    let sign_b = b.get_bit(31);
    let sign_r = result.get_bit(31);

    ArithmeticOpResult {
        result,
        carry: wide > u64::from(u32::MAX),
        overflow: sign_a == sign_b && sign_a != sign_r,
        sign: sign_r,
        zero: result == 0,
    }
}
