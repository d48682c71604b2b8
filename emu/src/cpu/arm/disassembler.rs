//! Disassembly payloads for the host.
//!
//! The UI renders instructions from structured arguments rather than a flat
//! string, so registers can be highlighted and constants restyled. The
//! [`PrettyInstr`] shape (tag names included) is a wire contract with the
//! host; [`ArmModeInstruction::disassemble`] flattens the same information
//! into classic assembly text for logs and the CLI listing.

use serde::Serialize;

use crate::bitwise::Bits;
use crate::cpu::arm::alu_instruction::{
    AluSecondOperandInfo, ArmModeAluInstruction, ShiftKind, ShiftOperator,
};
use crate::cpu::arm::instructions::{
    ArmModeInstruction, ArmModeMultiplyLongVariant, ArmModeMultiplyVariant,
    HalfwordTransferOffsetKind, PsrOpKind, SingleDataTransferOffsetInfo,
};
use crate::cpu::flags::{Indexing, LoadStoreKind, Offsetting, ReadWriteKind};

/// A disassembled instruction, split into opcode pieces and typed arguments.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PrettyInstr {
    pub opcode_prefix: String,
    pub cond: String,
    pub opcode_suffix: String,
    pub args: Vec<PrettyArgument>,
}

/// One argument of a disassembled instruction.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PrettyArgument {
    Register {
        index: u32,
        negative: bool,
        write_back: bool,
    },
    Psr {
        name: String,
        flag_only: bool,
    },
    Shift {
        #[serde(rename = "shift_type")]
        kind: ShiftKind,
        amount: PrettyShiftAmount,
    },
    Constant {
        value: u32,
        style: ConstantStyle,
    },
    RegisterSet {
        registers: Vec<u32>,
        caret: bool,
    },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value")]
pub enum PrettyShiftAmount {
    Constant(u32),
    Register(u32),
}

/// How the host should render a constant argument.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ConstantStyle {
    /// A code or data address; render in hex.
    Address,
    UnsignedDecimal,
    Unknown,
}

fn reg(index: u32) -> PrettyArgument {
    PrettyArgument::Register {
        index,
        negative: false,
        write_back: false,
    }
}

fn push_operand2(args: &mut Vec<PrettyArgument>, op2: AluSecondOperandInfo) {
    match op2 {
        AluSecondOperandInfo::Immediate { base, shift } => args.push(PrettyArgument::Constant {
            value: base.rotate_right(shift),
            style: ConstantStyle::Unknown,
        }),
        AluSecondOperandInfo::Register {
            register,
            shift_kind,
            shift_op,
        } => {
            args.push(reg(register));
            match shift_op {
                // LSL #0 is the no-shift idiom and renders bare.
                ShiftOperator::Immediate(0) if shift_kind == ShiftKind::Lsl => {}
                ShiftOperator::Immediate(amount) => args.push(PrettyArgument::Shift {
                    kind: shift_kind,
                    amount: PrettyShiftAmount::Constant(amount),
                }),
                ShiftOperator::Register(rs) => args.push(PrettyArgument::Shift {
                    kind: shift_kind,
                    amount: PrettyShiftAmount::Register(rs),
                }),
            }
        }
    }
}

impl ArmModeInstruction {
    /// Structured disassembly of this instruction.
    ///
    /// `address` is the address the word was fetched from; branches use it to
    /// render their absolute target.
    #[must_use]
    pub fn pretty(&self, address: u32) -> PrettyInstr {
        let cond = self.condition().to_string();
        let (opcode_prefix, opcode_suffix, args) = match *self {
            Self::DataProcessing {
                alu_instruction,
                set_conditions,
                rn,
                destination,
                op2,
                ..
            } => {
                let suffix = if set_conditions && !alu_instruction.is_comparison() {
                    "S"
                } else {
                    ""
                };
                let mut args = Vec::new();
                if !alu_instruction.is_comparison() {
                    args.push(reg(destination));
                }
                if !matches!(
                    alu_instruction,
                    ArmModeAluInstruction::Mov | ArmModeAluInstruction::Mvn
                ) {
                    args.push(reg(rn));
                }
                push_operand2(&mut args, op2);
                (alu_instruction.to_string(), suffix.to_owned(), args)
            }
            Self::Multiply {
                variant,
                set_conditions,
                rd,
                rn_accumulate,
                rs,
                rm,
                ..
            } => {
                let mut args = vec![reg(rd), reg(rm), reg(rs)];
                let prefix = match variant {
                    ArmModeMultiplyVariant::Mul => "MUL",
                    ArmModeMultiplyVariant::Mla => {
                        args.push(reg(rn_accumulate));
                        "MLA"
                    }
                };
                (
                    prefix.to_owned(),
                    if set_conditions { "S" } else { "" }.to_owned(),
                    args,
                )
            }
            Self::MultiplyLong {
                variant,
                set_conditions,
                rd_hi,
                rd_lo,
                rs,
                rm,
                ..
            } => {
                let prefix = match variant {
                    ArmModeMultiplyLongVariant::Umull => "UMULL",
                    ArmModeMultiplyLongVariant::Umlal => "UMLAL",
                    ArmModeMultiplyLongVariant::Smull => "SMULL",
                    ArmModeMultiplyLongVariant::Smlal => "SMLAL",
                };
                (
                    prefix.to_owned(),
                    if set_conditions { "S" } else { "" }.to_owned(),
                    vec![reg(rd_lo), reg(rd_hi), reg(rm), reg(rs)],
                )
            }
            Self::PsrTransfer {
                psr_kind, ref kind, ..
            } => {
                let psr = |flag_only: bool| PrettyArgument::Psr {
                    name: psr_kind.to_string(),
                    flag_only,
                };
                match *kind {
                    PsrOpKind::Mrs {
                        destination_register,
                    } => (
                        "MRS".to_owned(),
                        String::new(),
                        vec![reg(destination_register), psr(false)],
                    ),
                    PsrOpKind::Msr { source_register } => (
                        "MSR".to_owned(),
                        String::new(),
                        vec![psr(false), reg(source_register)],
                    ),
                    PsrOpKind::MsrFlg { operand } => {
                        let mut args = vec![psr(true)];
                        push_operand2(&mut args, operand);
                        ("MSR".to_owned(), String::new(), args)
                    }
                }
            }
            Self::SingleDataSwap {
                quantity,
                rd,
                rm,
                base_register,
                ..
            } => (
                "SWP".to_owned(),
                match quantity {
                    ReadWriteKind::Word => String::new(),
                    ReadWriteKind::Byte => "B".to_owned(),
                },
                vec![reg(rd), reg(rm), reg(base_register)],
            ),
            Self::BranchAndExchange { register, .. } => {
                ("BX".to_owned(), String::new(), vec![reg(register)])
            }
            Self::HalfwordDataTransfer {
                indexing,
                offsetting,
                write_back,
                load_store_kind,
                offset_kind,
                base_register,
                source_destination_register,
                transfer_kind,
                ..
            } => {
                let mut args = vec![
                    reg(source_destination_register),
                    PrettyArgument::Register {
                        index: base_register,
                        negative: false,
                        write_back: write_back || indexing == Indexing::Post,
                    },
                ];
                let negative = offsetting == Offsetting::Down;
                match offset_kind {
                    HalfwordTransferOffsetKind::Immediate { offset } => {
                        if offset != 0 {
                            args.push(PrettyArgument::Constant {
                                value: offset,
                                style: ConstantStyle::UnsignedDecimal,
                            });
                        }
                    }
                    HalfwordTransferOffsetKind::Register { register } => {
                        args.push(PrettyArgument::Register {
                            index: register,
                            negative,
                            write_back: false,
                        });
                    }
                }
                (
                    match load_store_kind {
                        LoadStoreKind::Load => "LDR",
                        LoadStoreKind::Store => "STR",
                    }
                    .to_owned(),
                    transfer_kind.to_string(),
                    args,
                )
            }
            Self::SingleDataTransfer {
                kind,
                quantity,
                write_back,
                indexing,
                offsetting,
                rd,
                base_register,
                offset_info,
                ..
            } => {
                let mut args = vec![
                    reg(rd),
                    PrettyArgument::Register {
                        index: base_register,
                        negative: false,
                        write_back: write_back || indexing == Indexing::Post,
                    },
                ];
                let negative = offsetting == Offsetting::Down;
                match offset_info {
                    SingleDataTransferOffsetInfo::Immediate { offset } => {
                        if offset != 0 {
                            args.push(PrettyArgument::Constant {
                                value: offset,
                                style: ConstantStyle::UnsignedDecimal,
                            });
                        }
                    }
                    SingleDataTransferOffsetInfo::RegisterImmediate {
                        shift_amount,
                        shift_kind,
                        reg_offset,
                    } => {
                        args.push(PrettyArgument::Register {
                            index: reg_offset,
                            negative,
                            write_back: false,
                        });
                        if !(shift_amount == 0 && shift_kind == ShiftKind::Lsl) {
                            args.push(PrettyArgument::Shift {
                                kind: shift_kind,
                                amount: PrettyShiftAmount::Constant(shift_amount),
                            });
                        }
                    }
                }
                (
                    match kind {
                        LoadStoreKind::Load => "LDR",
                        LoadStoreKind::Store => "STR",
                    }
                    .to_owned(),
                    match quantity {
                        ReadWriteKind::Word => String::new(),
                        ReadWriteKind::Byte => "B".to_owned(),
                    },
                    args,
                )
            }
            Self::BlockDataTransfer {
                indexing,
                offsetting,
                load_psr,
                write_back,
                load_store,
                rn,
                register_list,
                ..
            } => {
                let suffix = format!(
                    "{}{}",
                    match offsetting {
                        Offsetting::Up => "I",
                        Offsetting::Down => "D",
                    },
                    match indexing {
                        Indexing::Pre => "B",
                        Indexing::Post => "A",
                    }
                );
                let registers = (0..16)
                    .filter(|i| u32::from(register_list).get_bit(*i))
                    .map(u32::from)
                    .collect();
                (
                    match load_store {
                        LoadStoreKind::Load => "LDM",
                        LoadStoreKind::Store => "STM",
                    }
                    .to_owned(),
                    suffix,
                    vec![
                        PrettyArgument::Register {
                            index: rn,
                            negative: false,
                            write_back,
                        },
                        PrettyArgument::RegisterSet {
                            registers,
                            caret: load_psr,
                        },
                    ],
                )
            }
            Self::Branch { link, offset, .. } => (
                if link { "BL" } else { "B" }.to_owned(),
                String::new(),
                vec![PrettyArgument::Constant {
                    value: address.wrapping_add(8).wrapping_add_signed(offset),
                    style: ConstantStyle::Address,
                }],
            ),
            Self::SoftwareInterrupt { comment, .. } => (
                "SWI".to_owned(),
                String::new(),
                vec![PrettyArgument::Constant {
                    value: comment,
                    style: ConstantStyle::UnsignedDecimal,
                }],
            ),
            Self::Undefined => ("???".to_owned(), String::new(), Vec::new()),
        };

        PrettyInstr {
            opcode_prefix,
            cond,
            opcode_suffix,
            args,
        }
    }

    /// Classic one-line assembly text, with addressing brackets restored.
    #[must_use]
    pub fn disassemble(&self, address: u32) -> String {
        let pretty = self.pretty(address);
        let mut out = format!(
            "{}{}{}",
            pretty.opcode_prefix, pretty.cond, pretty.opcode_suffix
        );

        // Memory-class instructions wrap their address arguments in brackets.
        let brackets = matches!(
            self,
            Self::SingleDataTransfer { .. }
                | Self::HalfwordDataTransfer { .. }
                | Self::SingleDataSwap { .. }
        );

        for (position, arg) in pretty.args.iter().enumerate() {
            out.push_str(if position == 0 { " " } else { ", " });
            let open = brackets && position == 1 && !matches!(self, Self::SingleDataSwap { .. });
            if open || (matches!(self, Self::SingleDataSwap { .. }) && position == 2) {
                out.push('[');
            }
            match arg {
                PrettyArgument::Register {
                    index,
                    negative,
                    write_back,
                } => {
                    if *negative {
                        out.push('-');
                    }
                    out.push_str(&format!("R{index}"));
                    if *write_back {
                        out.push('!');
                    }
                }
                PrettyArgument::Psr { name, flag_only } => {
                    out.push_str(name);
                    if *flag_only {
                        out.push_str("_flg");
                    }
                }
                PrettyArgument::Shift { kind, amount } => match amount {
                    PrettyShiftAmount::Constant(n) => out.push_str(&format!("{kind} #{n}")),
                    PrettyShiftAmount::Register(r) => out.push_str(&format!("{kind} R{r}")),
                },
                PrettyArgument::Constant { value, style } => match style {
                    ConstantStyle::Address => out.push_str(&format!("0x{value:08X}")),
                    ConstantStyle::UnsignedDecimal => out.push_str(&format!("#{value}")),
                    ConstantStyle::Unknown => out.push_str(&format!("#{value}")),
                },
                PrettyArgument::RegisterSet { registers, caret } => {
                    out.push('{');
                    for (i, r) in registers.iter().enumerate() {
                        if i != 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&format!("R{r}"));
                    }
                    out.push('}');
                    if *caret {
                        out.push('^');
                    }
                }
            }
            let close = brackets
                && position + 1 == pretty.args.len()
                && !matches!(self, Self::Branch { .. });
            if close {
                out.push(']');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dis(word: u32) -> String {
        ArmModeInstruction::from(word).disassemble(0)
    }

    #[test]
    fn data_processing_text() {
        assert_eq!(dis(0xE082_1003), "ADD R1, R2, R3");
        assert_eq!(dis(0xE352_000A), "CMP R2, #10");
        assert_eq!(dis(0xE1B0_F00E), "MOVS R15, R14");
        assert_eq!(dis(0x11A0_1332), "MOVNE R1, R2, LSR R3");
    }

    #[test]
    fn branch_text_uses_absolute_address() {
        let instr = ArmModeInstruction::from(0xEA00_0004);
        assert_eq!(instr.disassemble(0x100), "B 0x00000118");

        let instr = ArmModeInstruction::from(0xEBFF_FFFE);
        assert_eq!(instr.disassemble(0x8), "BL 0x00000008");
    }

    #[test]
    fn transfer_text() {
        assert_eq!(dis(0xE592_1004), "LDR R1, [R2, #4]");
        assert_eq!(dis(0xE5A2_1004), "STR R1, [R2!, #4]");
        assert_eq!(dis(0xE1C1_00B0), "STRH R0, [R1]");
    }

    #[test]
    fn block_transfer_text() {
        assert_eq!(dis(0xE92D_4003), "STMDB R13!, {R0, R1, R14}");
        assert_eq!(dis(0xE8BD_8003), "LDMIA R13!, {R0, R1, R15}");
    }

    #[test]
    fn swi_text() {
        assert_eq!(dis(0xEF00_0002), "SWI #2");
    }

    #[test]
    fn pretty_payload_shape() {
        let instr = ArmModeInstruction::from(0xE92D_4003);
        let pretty = instr.pretty(0);
        assert_eq!(pretty.opcode_prefix, "STM");
        assert_eq!(pretty.opcode_suffix, "DB");
        assert_eq!(
            pretty.args[1],
            PrettyArgument::RegisterSet {
                registers: vec![0, 1, 14],
                caret: false
            }
        );

        let json = serde_json::to_value(&pretty).unwrap();
        assert_eq!(json["args"][0]["type"], "Register");
        assert_eq!(json["args"][0]["write_back"], true);
        assert_eq!(json["args"][1]["type"], "RegisterSet");
    }

    #[test]
    fn pretty_shift_payload() {
        let instr = ArmModeInstruction::from(0x11A0_1332);
        let json = serde_json::to_value(instr.pretty(0)).unwrap();
        assert_eq!(json["cond"], "NE");
        assert_eq!(json["args"][2]["type"], "Shift");
        assert_eq!(json["args"][2]["shift_type"], "LSR");
        assert_eq!(json["args"][2]["amount"]["type"], "Register");
    }
}
