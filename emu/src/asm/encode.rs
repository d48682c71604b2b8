//! Lowering parsed instructions into ARM v4 32-bit words.

use std::collections::BTreeMap;

use crate::cpu::arm::alu_instruction::ShiftKind;
use crate::cpu::arm::instructions::{ArmModeMultiplyLongVariant, ArmModeMultiplyVariant, PsrKind};
use crate::cpu::condition::Condition;
use crate::cpu::flags::HalfwordTransferKind;

use super::syntax::{
    AddressOperand, AsmInstr, AsmShift, Expression, MsrOperand, Operand2, ShiftAmount,
    SpecialOffset, TransferOffset,
};
use super::AsmErrorKind;

type Symbols = BTreeMap<String, i64>;

/// Attempts to express `value` as an 8-bit constant rotated right by an even
/// amount. Returns `(imm8, rotate/2)`.
pub fn encode_rotated_immediate(value: u32) -> Option<(u32, u32)> {
    (0..16u32).find_map(|half_rotate| {
        let imm = value.rotate_left(half_rotate * 2);
        (imm <= 0xFF).then_some((imm, half_rotate))
    })
}

fn evaluate_u32(expr: &Expression, symbols: &Symbols) -> Result<u32, AsmErrorKind> {
    let value = expr.evaluate(symbols)?;
    if !(-(1 << 31)..1 << 32).contains(&value) {
        return Err(AsmErrorKind::ValueOutOfRange(value));
    }
    Ok(value as u32)
}

/// Encodes the shift half of a register operand (bits 11..4).
fn encode_shift(shift: &AsmShift, symbols: &Symbols) -> Result<u32, AsmErrorKind> {
    let kind_bits = |kind: ShiftKind| match kind {
        ShiftKind::Lsl => 0b00u32,
        ShiftKind::Lsr => 0b01,
        ShiftKind::Asr => 0b10,
        ShiftKind::Ror | ShiftKind::Rrx => 0b11,
    };

    match &shift.amount {
        ShiftAmount::Register(rs) => {
            if shift.kind == ShiftKind::Rrx {
                return Err(AsmErrorKind::InvalidShift);
            }
            Ok((rs << 8) | (kind_bits(shift.kind) << 5) | (1 << 4))
        }
        ShiftAmount::Constant(expr) => {
            let amount = expr.evaluate(symbols)?;
            let encoded_amount = match (shift.kind, amount) {
                (ShiftKind::Rrx, _) => 0,
                // A zero amount encodes as LSL #0 regardless of the written
                // shift kind.
                (_, 0) => return Ok(0),
                (ShiftKind::Lsl, 1..=31) | (ShiftKind::Lsr | ShiftKind::Asr, 1..=31) => {
                    amount as u32
                }
                // LSR/ASR #32 use the reserved zero encoding.
                (ShiftKind::Lsr | ShiftKind::Asr, 32) => 0,
                (ShiftKind::Ror, 1..=31) => amount as u32,
                _ => return Err(AsmErrorKind::ShiftOutOfRange(amount)),
            };
            Ok((encoded_amount << 7) | (kind_bits(shift.kind) << 5))
        }
    }
}

/// Encodes operand 2 of a data processing instruction, returning the I bit
/// and bits 11..0.
fn encode_operand2(op2: &Operand2, symbols: &Symbols) -> Result<(bool, u32), AsmErrorKind> {
    match op2 {
        Operand2::Constant(expr) => {
            let value = evaluate_u32(expr, symbols)?;
            let (imm, half_rotate) = encode_rotated_immediate(value)
                .ok_or(AsmErrorKind::ImmediateUnencodable(value))?;
            Ok((true, (half_rotate << 8) | imm))
        }
        Operand2::Register(rm, shift) => Ok((false, encode_shift(shift, symbols)? | rm)),
    }
}

/// Encodes one instruction at `address`.
#[allow(clippy::too_many_lines)]
pub fn encode_instr(
    cond: Condition,
    instr: &AsmInstr,
    address: u32,
    symbols: &Symbols,
) -> Result<u32, AsmErrorKind> {
    let cond_bits = u32::from(cond as u8) << 28;

    let word = match instr {
        AsmInstr::DataProcessing {
            op,
            set_conditions,
            dest,
            op1,
            op2,
        } => {
            let (immediate, operand) = encode_operand2(op2, symbols)?;
            (u32::from(immediate) << 25)
                | ((*op as u32) << 21)
                | (u32::from(*set_conditions) << 20)
                | (op1 << 16)
                | (dest << 12)
                | operand
        }
        AsmInstr::Multiply {
            variant,
            set_conditions,
            rd,
            rm,
            rs,
            rn_accumulate,
        } => {
            let accumulate = *variant == ArmModeMultiplyVariant::Mla;
            (u32::from(accumulate) << 21)
                | (u32::from(*set_conditions) << 20)
                | (rd << 16)
                | (rn_accumulate << 12)
                | (rs << 8)
                | (0b1001 << 4)
                | rm
        }
        AsmInstr::MultiplyLong {
            variant,
            set_conditions,
            rd_lo,
            rd_hi,
            rm,
            rs,
        } => {
            let signed = matches!(
                variant,
                ArmModeMultiplyLongVariant::Smull | ArmModeMultiplyLongVariant::Smlal
            );
            let accumulate = matches!(
                variant,
                ArmModeMultiplyLongVariant::Umlal | ArmModeMultiplyLongVariant::Smlal
            );
            (0b00001 << 23)
                | (u32::from(signed) << 22)
                | (u32::from(accumulate) << 21)
                | (u32::from(*set_conditions) << 20)
                | (rd_hi << 16)
                | (rd_lo << 12)
                | (rs << 8)
                | (0b1001 << 4)
                | rm
        }
        AsmInstr::Branch { link, target } => {
            let target = evaluate_u32(target, symbols)?;
            let offset = i64::from(target) - (i64::from(address) + 8);
            if offset % 4 != 0 {
                return Err(AsmErrorKind::MisalignedBranchTarget(target));
            }
            let field = offset >> 2;
            if !(-(1 << 23)..1 << 23).contains(&field) {
                return Err(AsmErrorKind::BranchOutOfRange(target));
            }
            (0b101 << 25) | (u32::from(*link) << 24) | (field as u32 & 0x00FF_FFFF)
        }
        AsmInstr::BranchExchange { rm } => (0b0001_0010_1111_1111_1111_0001 << 4) | rm,
        AsmInstr::SingleTransfer {
            load,
            byte,
            rd,
            base,
            address: operand,
        } => {
            let (immediate, up, offset) = encode_transfer_offset(operand, symbols)?;
            (0b01 << 26)
                | (u32::from(!immediate) << 25)
                | (u32::from(operand.pre_index) << 24)
                | (u32::from(up) << 23)
                | (u32::from(*byte) << 22)
                | (u32::from(operand.write_back) << 21)
                | (u32::from(*load) << 20)
                | (base << 16)
                | (rd << 12)
                | offset
        }
        AsmInstr::HalfwordTransfer {
            load,
            kind,
            rd,
            base,
            address: operand,
        } => {
            let (immediate, up, offset) = encode_special_offset(operand, symbols)?;
            let sh = match kind {
                HalfwordTransferKind::UnsignedHalfword => 0b01,
                HalfwordTransferKind::SignedByte => 0b10,
                HalfwordTransferKind::SignedHalfword => 0b11,
            };
            (u32::from(operand.pre_index) << 24)
                | (u32::from(up) << 23)
                | (u32::from(immediate) << 22)
                | (u32::from(operand.write_back) << 21)
                | (u32::from(*load) << 20)
                | (base << 16)
                | (rd << 12)
                | (1 << 7)
                | (sh << 5)
                | (1 << 4)
                | offset
        }
        AsmInstr::BlockTransfer {
            load,
            pre_index,
            up,
            write_back,
            psr,
            base,
            register_list,
        } => {
            (0b100 << 25)
                | (u32::from(*pre_index) << 24)
                | (u32::from(*up) << 23)
                | (u32::from(*psr) << 22)
                | (u32::from(*write_back) << 21)
                | (u32::from(*load) << 20)
                | (base << 16)
                | u32::from(*register_list)
        }
        AsmInstr::Swap { byte, rd, rm, base } => {
            (0b00010 << 23)
                | (u32::from(*byte) << 22)
                | (base << 16)
                | (rd << 12)
                | (0b1001 << 4)
                | rm
        }
        AsmInstr::Mrs { psr, rd } => {
            (0b00010 << 23)
                | (u32::from(*psr == PsrKind::Spsr) << 22)
                | (0b00_1111 << 16)
                | (rd << 12)
        }
        AsmInstr::Msr {
            psr,
            flags_only,
            source,
        } => {
            let psr_bit = u32::from(*psr == PsrKind::Spsr) << 22;
            match (flags_only, source) {
                (false, MsrOperand::Register(rm)) => {
                    (0b00010 << 23) | psr_bit | (0b10_1001_1111 << 12) | rm
                }
                (true, MsrOperand::Register(rm)) => {
                    (0b00010 << 23) | psr_bit | (0b10_1000_1111 << 12) | rm
                }
                (true, MsrOperand::Constant(expr)) => {
                    let value = evaluate_u32(expr, symbols)?;
                    let (imm, half_rotate) = encode_rotated_immediate(value)
                        .ok_or(AsmErrorKind::ImmediateUnencodable(value))?;
                    (0b00110 << 23) | psr_bit | (0b10_1000_1111 << 12) | (half_rotate << 8) | imm
                }
                (false, MsrOperand::Constant(_)) => return Err(AsmErrorKind::InvalidPsr),
            }
        }
        AsmInstr::SoftwareInterrupt { comment } => {
            let comment = evaluate_u32(comment, symbols)?;
            if comment > 0x00FF_FFFF {
                return Err(AsmErrorKind::ValueOutOfRange(i64::from(comment)));
            }
            (0b1111 << 24) | comment
        }
    };

    Ok(cond_bits | word)
}

/// Encodes the offset of a word/byte transfer. Returns (immediate?, up, bits
/// 11..0). A negative constant flips the U bit.
fn encode_transfer_offset(
    operand: &AddressOperand<TransferOffset>,
    symbols: &Symbols,
) -> Result<(bool, bool, u32), AsmErrorKind> {
    match &operand.offset {
        TransferOffset::Constant(expr) => {
            let value = expr.evaluate(symbols)?;
            let up = value >= 0;
            let magnitude = value.unsigned_abs();
            if magnitude > 0xFFF {
                return Err(AsmErrorKind::OffsetOutOfRange(value));
            }
            Ok((true, up, magnitude as u32))
        }
        TransferOffset::Register(rm, shift) => {
            if matches!(shift.amount, ShiftAmount::Register(_)) {
                return Err(AsmErrorKind::RegisterShiftInTransfer);
            }
            Ok((
                false,
                operand.positive,
                encode_shift(shift, symbols)? | rm,
            ))
        }
    }
}

/// Encodes the offset of a halfword/signed transfer: an 8-bit constant split
/// across two nibbles, or a bare register.
fn encode_special_offset(
    operand: &AddressOperand<SpecialOffset>,
    symbols: &Symbols,
) -> Result<(bool, bool, u32), AsmErrorKind> {
    match &operand.offset {
        SpecialOffset::Constant(expr) => {
            let value = expr.evaluate(symbols)?;
            let up = value >= 0;
            let magnitude = value.unsigned_abs();
            if magnitude > 0xFF {
                return Err(AsmErrorKind::OffsetOutOfRange(value));
            }
            let magnitude = magnitude as u32;
            Ok((true, up, ((magnitude & 0xF0) << 4) | (magnitude & 0x0F)))
        }
        SpecialOffset::Register(rm) => Ok((false, operand.positive, *rm)),
    }
}

/// Expands `adr Rd, target` into an ADD or SUB of the PC, depending on where
/// the target lies relative to the instruction.
pub fn encode_adr(
    cond: Condition,
    rd: u32,
    target: &Expression,
    address: u32,
    symbols: &Symbols,
) -> Result<u32, AsmErrorKind> {
    use crate::cpu::arm::alu_instruction::ArmModeAluInstruction;

    let target = evaluate_u32(target, symbols)?;
    let delta = i64::from(target) - (i64::from(address) + 8);
    let (op, magnitude) = if delta >= 0 {
        (ArmModeAluInstruction::Add, delta as u32)
    } else {
        (ArmModeAluInstruction::Sub, (-delta) as u32)
    };

    let (imm, half_rotate) = encode_rotated_immediate(magnitude)
        .ok_or(AsmErrorKind::ImmediateUnencodable(magnitude))?;

    Ok((u32::from(cond as u8) << 28)
        | (1 << 25)
        | ((op as u32) << 21)
        | (15 << 16)
        | (rd << 12)
        | (half_rotate << 8)
        | imm)
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_line;
    use super::super::syntax::LineItem;
    use super::*;
    use crate::cpu::arm::instructions::ArmModeInstruction;
    use pretty_assertions::assert_eq;

    fn encode(line: &str) -> u32 {
        encode_at(line, 0)
    }

    fn encode_at(line: &str, address: u32) -> u32 {
        let parsed = parse_line(1, line).unwrap();
        match parsed.item.unwrap() {
            LineItem::Instr(cond, instr) => {
                encode_instr(cond, &instr, address, &Symbols::new()).unwrap()
            }
            LineItem::Adr { cond, rd, target } => {
                encode_adr(cond, rd, &target, address, &Symbols::new()).unwrap()
            }
            other => panic!("not an instruction: {other:?}"),
        }
    }

    /// Encoding is checked through the decoder: the assembled word must
    /// disassemble back to its canonical text.
    fn round_trip(line: &str, expected: &str) {
        let word = encode(line);
        assert_eq!(
            ArmModeInstruction::from(word).disassemble(0),
            expected,
            "word was {word:#010X}"
        );
    }

    #[test]
    fn rotated_immediates() {
        assert_eq!(encode_rotated_immediate(0xFF), Some((0xFF, 0)));
        assert_eq!(encode_rotated_immediate(0xFF00_0000), Some((0xFF, 4)));
        assert_eq!(encode_rotated_immediate(0x104), None);
        assert_eq!(encode_rotated_immediate(0x0001_0200), None);
        assert_eq!(encode_rotated_immediate(0), Some((0, 0)));
    }

    #[test]
    fn encodes_data_processing() {
        assert_eq!(encode("add r1, r2, #1"), 0xE282_1001);
        assert_eq!(encode("adds r1, r2, r3"), 0xE092_1003);
        assert_eq!(encode("moveq r0, #0"), 0x03A0_0000);
        assert_eq!(encode("cmp r2, #10"), 0xE352_000A);
        round_trip("orr r4, r5, r6, lsl r7", "ORR R4, R5, R6, LSL R7");
        round_trip("mov r1, r2, lsr #32", "MOV R1, R2, LSR #32");
        round_trip("mov r1, r2, rrx", "MOV R1, R2, RRX");
    }

    #[test]
    fn encodes_branches() {
        assert_eq!(encode("b 8"), 0xEA00_0000);
        assert_eq!(encode_at("b 0", 8), 0xEAFF_FFFC);
        assert_eq!(encode("bl 8"), 0xEB00_0000);
        assert_eq!(encode("bx lr"), 0xE12F_FF1E);
    }

    #[test]
    fn encodes_transfers() {
        assert_eq!(encode("ldr r1, [r2, #4]"), 0xE592_1004);
        assert_eq!(encode("str r0, [r1]"), 0xE581_0000);
        round_trip("ldrb r3, [r4], #-2", "LDRB R3, [R4!, #2]");
        round_trip("strh r0, [r1]", "STRH R0, [R1]");
        round_trip("ldrsh r2, [r3, #4]", "LDRSH R2, [R3, #4]");
        round_trip("ldr r0, [r1, -r2, lsl #2]", "LDR R0, [R1, -R2, LSL #2]");
    }

    #[test]
    fn encodes_block_transfers() {
        assert_eq!(encode("stmfd sp!, {r0, r1, lr}"), 0xE92D_4003);
        assert_eq!(encode("ldmfd sp!, {r0, r1, pc}"), 0xE8BD_8003);
        assert_eq!(encode("stmia r0!, {}"), 0xE8A0_0000);
    }

    #[test]
    fn encodes_psr_transfers() {
        assert_eq!(encode("mrs r0, cpsr"), 0xE10F_0000);
        assert_eq!(encode("msr cpsr, r0"), 0xE129_F000);
        assert_eq!(encode("msr spsr, lr"), 0xE169_F00E);
        // The encoder picks the smallest rotation: 0xF ROR 4.
        assert_eq!(encode("msr cpsr_flg, #0xF0000000"), 0xE328_F20F);
    }

    #[test]
    fn encodes_multiplies() {
        round_trip("mul r4, r2, r3", "MUL R4, R2, R3");
        round_trip("mla r5, r2, r3, r4", "MLA R5, R2, R3, R4");
        round_trip("umulls r4, r5, r2, r3", "UMULLS R4, R5, R2, R3");
        round_trip("smlal r4, r5, r2, r3", "SMLAL R4, R5, R2, R3");
    }

    #[test]
    fn encodes_swap_and_swi() {
        round_trip("swp r0, r1, [r2]", "SWP R0, R1, [R2]");
        round_trip("swpb r0, r1, [r2]", "SWPB R0, R1, [R2]");
        assert_eq!(encode("swi 2"), 0xEF00_0002);
    }

    #[test]
    fn adr_expands_to_add_or_sub() {
        // Target ahead of the instruction.
        assert_eq!(encode_at("adr r0, 0x10", 0), 0xE28F_0008);
        // Target behind: SUB with the magnitude.
        assert_eq!(encode_at("adr r0, 0", 8), 0xE24F_0010);
    }

    #[test]
    fn unencodable_immediate_is_an_error() {
        let parsed = parse_line(1, "mov r0, #0x101").unwrap();
        let LineItem::Instr(cond, instr) = parsed.item.unwrap() else {
            panic!()
        };
        assert_eq!(
            encode_instr(cond, &instr, 0, &Symbols::new()),
            Err(AsmErrorKind::ImmediateUnencodable(0x101))
        );
    }

    #[test]
    fn branch_range_checks() {
        let parsed = parse_line(1, "b 3").unwrap();
        let LineItem::Instr(cond, instr) = parsed.item.unwrap() else {
            panic!()
        };
        assert_eq!(
            encode_instr(cond, &instr, 0, &Symbols::new()),
            Err(AsmErrorKind::MisalignedBranchTarget(3))
        );
    }
}
