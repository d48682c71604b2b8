//! Execution of the decoded instruction classes.
//!
//! Each handler attributes bus cycles to the N/S/I counters following the
//! ARM7 data sheet approximations: a pipeline flush costs an extra fetch
//! pair, register-specified shifts and multiplies add internal cycles, and
//! loads pay one non-sequential access plus one internal cycle.

use crate::cpu::arm::alu_instruction::{
    add_with_carry, shift, AluInstructionKind, AluSecondOperandInfo, ArithmeticOpResult,
    ArmModeAluInstruction, ShiftOperator,
};
use crate::cpu::arm::instructions::{
    ArmModeInstruction, ArmModeMultiplyLongVariant, ArmModeMultiplyVariant,
    HalfwordTransferOffsetKind, PsrKind, PsrOpKind, SingleDataTransferOffsetInfo,
};
use crate::cpu::arm7tdmi::{Arm7tdmi, ExecError, ExecStatus};
use crate::cpu::cpu_modes::Mode;
use crate::cpu::flags::{
    HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, ReadWriteKind,
};
use crate::cpu::psr::Psr;
use crate::cpu::registers::REG_PC;

pub const SIZE_OF_INSTRUCTION: u32 = 4;

/// Supervisor call vector, taken by SWI numbers without a terminal binding
/// when raised from a privileged mode.
const SWI_VECTOR: u32 = 0x08;

impl Arm7tdmi {
    pub(crate) fn execute_arm(
        &mut self,
        instruction: ArmModeInstruction,
    ) -> Result<ExecStatus, ExecError> {
        match instruction {
            ArmModeInstruction::DataProcessing {
                condition: _,
                alu_instruction,
                set_conditions,
                rn,
                destination,
                op2,
            } => self.data_processing(alu_instruction, set_conditions, rn, destination, op2)?,
            ArmModeInstruction::Multiply {
                variant,
                condition: _,
                set_conditions,
                rd,
                rn_accumulate,
                rs,
                rm,
            } => self.multiply(variant, set_conditions, rd, rn_accumulate, rs, rm),
            ArmModeInstruction::MultiplyLong {
                variant,
                condition: _,
                set_conditions,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => self.multiply_long(variant, set_conditions, rd_hi, rd_lo, rs, rm),
            ArmModeInstruction::PsrTransfer {
                condition: _,
                psr_kind,
                kind,
            } => self.psr_transfer(kind, psr_kind)?,
            ArmModeInstruction::SingleDataSwap {
                condition: _,
                quantity,
                rd,
                rm,
                base_register,
            } => self.swap(quantity, rd, rm, base_register),
            ArmModeInstruction::BranchAndExchange {
                condition: _,
                register,
            } => self.branch_and_exchange(register)?,
            ArmModeInstruction::HalfwordDataTransfer {
                condition: _,
                indexing,
                offsetting,
                write_back,
                load_store_kind,
                offset_kind,
                base_register,
                source_destination_register,
                transfer_kind,
            } => self.halfword_data_transfer(
                indexing,
                offsetting,
                write_back,
                load_store_kind,
                offset_kind,
                base_register,
                source_destination_register,
                transfer_kind,
            ),
            ArmModeInstruction::SingleDataTransfer {
                condition: _,
                kind,
                quantity,
                write_back,
                indexing,
                offsetting,
                rd,
                base_register,
                offset_info,
            } => self.single_data_transfer(
                kind,
                quantity,
                write_back,
                indexing,
                offsetting,
                rd,
                base_register,
                offset_info,
            ),
            ArmModeInstruction::BlockDataTransfer {
                condition: _,
                indexing,
                offsetting,
                load_psr,
                write_back,
                load_store,
                rn,
                register_list,
            } => self.block_data_transfer(
                indexing,
                offsetting,
                load_psr,
                write_back,
                load_store,
                rn,
                register_list,
            )?,
            ArmModeInstruction::Branch {
                condition: _,
                link,
                offset,
            } => self.branch(link, offset),
            ArmModeInstruction::SoftwareInterrupt {
                condition: _,
                comment,
            } => return self.software_interrupt(comment),
            ArmModeInstruction::Undefined => return Err(ExecError::UndefinedInstruction),
        }

        Ok(ExecStatus::Completed)
    }

    /// Evaluates operand 2, producing the value and the barrel shifter
    /// carry-out. `pc_extra` is 4 when a register-specified shift amount
    /// makes R15 reads observe `pc + 12`.
    fn evaluate_operand2(&self, op2: AluSecondOperandInfo, pc_extra: u32) -> (u32, bool) {
        let carry_in = self.cpsr().carry_flag();
        match op2 {
            AluSecondOperandInfo::Immediate { base, shift: rot } => {
                let value = base.rotate_right(rot);
                let carry = if rot == 0 {
                    carry_in
                } else {
                    value & (1 << 31) != 0
                };
                (value, carry)
            }
            AluSecondOperandInfo::Register {
                register,
                shift_kind,
                shift_op,
            } => {
                let mut rm = self.read_register(register);
                if register == REG_PC {
                    rm = rm.wrapping_add(pc_extra);
                }
                let amount = match shift_op {
                    ShiftOperator::Immediate(amount) => amount,
                    ShiftOperator::Register(rs) => self.read_register(rs) & 0xFF,
                };
                let out = shift(shift_kind, amount, rm, carry_in);
                (out.value, out.carry)
            }
        }
    }

    fn data_processing(
        &mut self,
        alu_instruction: ArmModeAluInstruction,
        set_conditions: bool,
        rn: u32,
        destination: u32,
        op2: AluSecondOperandInfo,
    ) -> Result<(), ExecError> {
        self.cycle_seq(1);
        let pc_extra = if op2.is_register_specified_shift() {
            self.cycle_internal(1);
            4
        } else {
            0
        };

        let mut op1 = self.read_register(rn);
        if rn == REG_PC {
            op1 = op1.wrapping_add(pc_extra);
        }
        let (op2, shifter_carry) = self.evaluate_operand2(op2, pc_extra);

        let carry_in = self.cpsr().carry_flag();

        use ArmModeAluInstruction::*;
        let outcome = match alu_instruction {
            And | Tst => logical(op1 & op2, shifter_carry),
            Eor | Teq => logical(op1 ^ op2, shifter_carry),
            Orr => logical(op1 | op2, shifter_carry),
            Bic => logical(op1 & !op2, shifter_carry),
            Mov => logical(op2, shifter_carry),
            Mvn => logical(!op2, shifter_carry),
            Add | Cmn => add_with_carry(op1, op2, false),
            Adc => add_with_carry(op1, op2, carry_in),
            Sub | Cmp => add_with_carry(op1, !op2, true),
            Sbc => add_with_carry(op1, !op2, carry_in),
            Rsb => add_with_carry(op2, !op1, true),
            Rsc => add_with_carry(op2, !op1, carry_in),
        };

        if set_conditions {
            if destination == REG_PC && !alu_instruction.is_comparison() {
                // S with Rd = PC restores CPSR from the current mode's SPSR.
                let mode = self.mode();
                let spsr = self
                    .registers
                    .spsr(mode)
                    .ok_or(ExecError::NoSpsr(mode))?;
                self.write_cpsr_checked(spsr)?;
            } else {
                let mut cpsr = self.cpsr();
                cpsr.set_sign_flag(outcome.sign);
                cpsr.set_zero_flag(outcome.zero);
                cpsr.set_carry_flag(outcome.carry);
                if alu_instruction.kind() == AluInstructionKind::Arithmetic {
                    cpsr.set_overflow_flag(outcome.overflow);
                }
                self.registers.set_cpsr(cpsr);
            }
        }

        if !alu_instruction.is_comparison() {
            self.write_register(destination, outcome.result);
            if destination == REG_PC {
                self.cycle_pipeline_flush();
            }
        }

        Ok(())
    }

    fn branch(&mut self, link: bool, offset: i32) {
        self.cycle_seq(1);
        // R15 already points at pc + 4 here, which is exactly the address of
        // the next instruction.
        if link {
            let return_address = self.registers.program_counter();
            let mode = self.mode();
            self.registers.set(14, mode, return_address);
        }

        let target = self.read_register(REG_PC).wrapping_add_signed(offset);
        self.write_register(REG_PC, target);
        self.cycle_pipeline_flush();
    }

    fn branch_and_exchange(&mut self, register: u32) -> Result<(), ExecError> {
        self.cycle_seq(1);
        let target = self.read_register(register);
        if target & 0b1 != 0 {
            return Err(ExecError::ThumbState);
        }
        self.write_register(REG_PC, target);
        self.cycle_pipeline_flush();
        Ok(())
    }

    fn psr_transfer(&mut self, kind: PsrOpKind, psr_kind: PsrKind) -> Result<(), ExecError> {
        self.cycle_seq(1);
        let mode = self.mode();

        match kind {
            PsrOpKind::Mrs {
                destination_register,
            } => {
                let psr = match psr_kind {
                    PsrKind::Cpsr => self.cpsr(),
                    PsrKind::Spsr => self.registers.spsr(mode).ok_or(ExecError::NoSpsr(mode))?,
                };
                self.write_register(destination_register, psr.into());
            }
            PsrOpKind::Msr { source_register } => {
                let value = self.read_register(source_register);
                match psr_kind {
                    PsrKind::Cpsr => {
                        // Only an architected User mode is restricted; the
                        // ill-defined boot CPSR may still be written whole.
                        if self.registers.cpsr().mode() == Some(Mode::User) {
                            // User mode can only touch the flag bits.
                            let mut cpsr = self.cpsr();
                            cpsr.set_flags_field(value);
                            self.registers.set_cpsr(cpsr);
                        } else {
                            self.write_cpsr_checked(Psr::from(value))?;
                        }
                    }
                    PsrKind::Spsr => {
                        if !self.registers.set_spsr(mode, Psr::from(value)) {
                            return Err(ExecError::NoSpsr(mode));
                        }
                    }
                }
            }
            PsrOpKind::MsrFlg { operand } => {
                let (value, _) = self.evaluate_operand2(operand, 0);
                match psr_kind {
                    PsrKind::Cpsr => {
                        let mut cpsr = self.cpsr();
                        cpsr.set_flags_field(value);
                        self.registers.set_cpsr(cpsr);
                    }
                    PsrKind::Spsr => {
                        let mut spsr = self.registers.spsr(mode).ok_or(ExecError::NoSpsr(mode))?;
                        spsr.set_flags_field(value);
                        self.registers.set_spsr(mode, spsr);
                    }
                }
            }
        }

        Ok(())
    }

    /// Writes the full CPSR. The new mode bits must name a recognised mode;
    /// the T bit is ignored, as this core never leaves ARM state.
    fn write_cpsr_checked(&mut self, value: Psr) -> Result<(), ExecError> {
        let raw = u32::from(value);
        let mode_bits = raw & 0b11111;
        Mode::try_from(mode_bits).map_err(ExecError::InvalidMode)?;
        self.registers.set_cpsr(Psr::from(raw & !0b10_0000));
        Ok(())
    }

    fn multiply(
        &mut self,
        variant: ArmModeMultiplyVariant,
        set_conditions: bool,
        rd: u32,
        rn_accumulate: u32,
        rs: u32,
        rm: u32,
    ) {
        self.cycle_seq(1);
        let multiplier = self.read_register(rs);
        let mut internal = leading_multiplier_cycles(multiplier, 4);

        let mut result = self
            .read_register(rm)
            .wrapping_mul(multiplier);
        if variant == ArmModeMultiplyVariant::Mla {
            result = result.wrapping_add(self.read_register(rn_accumulate));
            internal += 1;
        }
        self.cycle_internal(internal);

        // C and V are left unchanged by multiplies on ARMv4.
        if set_conditions {
            let mut cpsr = self.cpsr();
            cpsr.set_sign_flag(result & (1 << 31) != 0);
            cpsr.set_zero_flag(result == 0);
            self.registers.set_cpsr(cpsr);
        }

        self.write_register(rd, result);
    }

    #[allow(clippy::too_many_arguments)]
    fn multiply_long(
        &mut self,
        variant: ArmModeMultiplyLongVariant,
        set_conditions: bool,
        rd_hi: u32,
        rd_lo: u32,
        rs: u32,
        rm: u32,
    ) {
        self.cycle_seq(1);
        let multiplier = self.read_register(rs);
        let mut internal = if variant.is_signed() {
            leading_multiplier_cycles(multiplier, 5)
        } else {
            leading_zero_cycles(multiplier, 5)
        };

        let addend = if variant.accumulates() {
            internal += 1;
            (u64::from(self.read_register(rd_hi)) << 32) | u64::from(self.read_register(rd_lo))
        } else {
            0
        };
        self.cycle_internal(internal);

        let multiplicand = self.read_register(rm);
        let result = if variant.is_signed() {
            (i64::from(multiplicand as i32))
                .wrapping_mul(i64::from(multiplier as i32))
                .wrapping_add_unsigned(addend) as u64
        } else {
            u64::from(multiplicand)
                .wrapping_mul(u64::from(multiplier))
                .wrapping_add(addend)
        };

        if set_conditions {
            let mut cpsr = self.cpsr();
            cpsr.set_sign_flag(result & (1 << 63) != 0);
            cpsr.set_zero_flag(result == 0);
            self.registers.set_cpsr(cpsr);
        }

        self.write_register(rd_hi, (result >> 32) as u32);
        self.write_register(rd_lo, result as u32);
    }

    #[allow(clippy::too_many_arguments)]
    fn single_data_transfer(
        &mut self,
        kind: LoadStoreKind,
        quantity: ReadWriteKind,
        write_back: bool,
        indexing: Indexing,
        offsetting: Offsetting,
        rd: u32,
        base_register: u32,
        offset_info: SingleDataTransferOffsetInfo,
    ) {
        let amount = match offset_info {
            SingleDataTransferOffsetInfo::Immediate { offset } => offset,
            SingleDataTransferOffsetInfo::RegisterImmediate {
                shift_amount,
                shift_kind,
                reg_offset,
            } => {
                let rm = self.read_register(reg_offset);
                shift(shift_kind, shift_amount, rm, self.cpsr().carry_flag()).value
            }
        };

        let base = self.read_register(base_register);
        let effective = match offsetting {
            Offsetting::Down => base.wrapping_sub(amount),
            Offsetting::Up => base.wrapping_add(amount),
        };
        let address = match indexing {
            Indexing::Pre => effective,
            Indexing::Post => base,
        };
        // Post-indexing always writes the stepped address back.
        let write_back = write_back || indexing == Indexing::Post;

        match kind {
            LoadStoreKind::Load => {
                self.cycle_seq(1);
                self.cycle_nonseq(1);
                self.cycle_internal(1);

                // Writeback happens before the load: when Rd is also the
                // base, the loaded value wins.
                if write_back {
                    self.write_register(base_register, effective);
                }
                let value = match quantity {
                    ReadWriteKind::Word => self.memory.read_word(address),
                    ReadWriteKind::Byte => u32::from(self.memory.read_byte(address)),
                };
                self.write_register(rd, value);
                if rd == REG_PC {
                    self.cycle_pipeline_flush();
                }
            }
            LoadStoreKind::Store => {
                self.cycle_nonseq(2);

                // The source value is read before any writeback: storing the
                // base register stores its original value.
                let mut value = self.read_register(rd);
                if rd == REG_PC {
                    // Stored PC reads as the instruction address + 12.
                    value = value.wrapping_add(4);
                }
                match quantity {
                    ReadWriteKind::Word => self.memory.write_word(address, value),
                    ReadWriteKind::Byte => self.memory.write_byte(address, value as u8),
                }
                if write_back {
                    self.write_register(base_register, effective);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn halfword_data_transfer(
        &mut self,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        load_store_kind: LoadStoreKind,
        offset_kind: HalfwordTransferOffsetKind,
        base_register: u32,
        source_destination_register: u32,
        transfer_kind: HalfwordTransferKind,
    ) {
        let amount = match offset_kind {
            HalfwordTransferOffsetKind::Immediate { offset } => offset,
            HalfwordTransferOffsetKind::Register { register } => self.read_register(register),
        };

        let base = self.read_register(base_register);
        let effective = match offsetting {
            Offsetting::Down => base.wrapping_sub(amount),
            Offsetting::Up => base.wrapping_add(amount),
        };
        let address = match indexing {
            Indexing::Pre => effective,
            Indexing::Post => base,
        };
        let write_back = write_back || indexing == Indexing::Post;

        match load_store_kind {
            LoadStoreKind::Load => {
                self.cycle_seq(1);
                self.cycle_nonseq(1);
                self.cycle_internal(1);

                if write_back {
                    self.write_register(base_register, effective);
                }
                let value = match transfer_kind {
                    HalfwordTransferKind::UnsignedHalfword => {
                        let half = u32::from(self.memory.read_half_word(address));
                        if address & 0b1 == 0 {
                            half
                        } else {
                            // Misaligned halfword loads rotate by one byte.
                            half.rotate_right(8)
                        }
                    }
                    HalfwordTransferKind::SignedByte => self.memory.read_signed_byte(address),
                    HalfwordTransferKind::SignedHalfword => {
                        self.memory.read_signed_half_word(address)
                    }
                };
                self.write_register(source_destination_register, value);
                if source_destination_register == REG_PC {
                    self.cycle_pipeline_flush();
                }
            }
            LoadStoreKind::Store => {
                self.cycle_nonseq(2);

                let mut value = self.read_register(source_destination_register);
                if source_destination_register == REG_PC {
                    value = value.wrapping_add(4);
                }
                self.memory.write_half_word(address, value as u16);
                if write_back {
                    self.write_register(base_register, effective);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn block_data_transfer(
        &mut self,
        indexing: Indexing,
        offsetting: Offsetting,
        load_psr: bool,
        write_back: bool,
        load_store: LoadStoreKind,
        rn: u32,
        register_list: u16,
    ) -> Result<(), ExecError> {
        // An empty register list transfers all sixteen registers; the
        // writeback below then advances the base by 0x40.
        let register_list = if register_list == 0 {
            0xFFFF
        } else {
            register_list
        };
        let registers: Vec<u32> = (0..16u32)
            .filter(|i| register_list & (1 << i) != 0)
            .collect();
        let count = registers.len() as u32;
        let pc_in_list = register_list & (1 << 15) != 0;

        let base = self.registers.get(rn, self.mode());
        let span = 4 * count;
        let (start, final_base) = match (offsetting, indexing) {
            (Offsetting::Up, Indexing::Post) => (base, base.wrapping_add(span)),
            (Offsetting::Up, Indexing::Pre) => (base.wrapping_add(4), base.wrapping_add(span)),
            (Offsetting::Down, Indexing::Post) => (
                base.wrapping_sub(span).wrapping_add(4),
                base.wrapping_sub(span),
            ),
            (Offsetting::Down, Indexing::Pre) => {
                (base.wrapping_sub(span), base.wrapping_sub(span))
            }
        };

        // The `^` suffix transfers the user bank (unless this is an LDM with
        // PC in the list, where it restores CPSR from SPSR instead).
        let user_bank = load_psr && !(load_store == LoadStoreKind::Load && pc_in_list);
        let mode = self.mode();
        let lowest = registers.first().copied();

        match load_store {
            LoadStoreKind::Store => {
                self.cycle_seq(u64::from(count.saturating_sub(1)));
                self.cycle_nonseq(2);

                for (position, &reg) in registers.iter().enumerate() {
                    let address = start.wrapping_add(4 * position as u32);
                    let value = if reg == rn {
                        // The lowest-numbered register stores the original
                        // base; later positions see the written-back value.
                        if write_back && lowest != Some(rn) {
                            final_base
                        } else {
                            base
                        }
                    } else {
                        let bank = if user_bank { Mode::User } else { mode };
                        let raw = self.registers.get(reg, bank);
                        if reg == REG_PC {
                            raw.wrapping_add(8)
                        } else {
                            raw
                        }
                    };
                    self.memory.write_word(address, value);
                }

                if write_back && !user_bank {
                    self.registers.set(rn, mode, final_base);
                }
            }
            LoadStoreKind::Load => {
                self.cycle_seq(u64::from(count));
                self.cycle_nonseq(1);
                self.cycle_internal(1);

                // Writeback first: a loaded base register wins.
                if write_back && !user_bank {
                    self.registers.set(rn, mode, final_base);
                }

                for (position, &reg) in registers.iter().enumerate() {
                    let address = start.wrapping_add(4 * position as u32);
                    let value = self.memory.read_word_aligned(address);
                    if user_bank {
                        self.registers.set(reg, Mode::User, value);
                    } else if reg == REG_PC {
                        self.write_register(REG_PC, value);
                    } else {
                        self.registers.set(reg, mode, value);
                    }
                }

                if pc_in_list {
                    self.cycle_pipeline_flush();
                    if load_psr {
                        // LDM with `^` and PC restores CPSR from SPSR.
                        let spsr = self
                            .registers
                            .spsr(mode)
                            .ok_or(ExecError::NoSpsr(mode))?;
                        self.write_cpsr_checked(spsr)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn swap(&mut self, quantity: ReadWriteKind, rd: u32, rm: u32, base_register: u32) {
        self.cycle_seq(1);
        self.cycle_nonseq(2);
        self.cycle_internal(1);

        let address = self.read_register(base_register);
        let source = self.read_register(rm);
        match quantity {
            ReadWriteKind::Word => {
                // Misaligned swap loads rotate exactly as LDR does.
                let loaded = self.memory.read_word(address);
                self.memory.write_word(address, source);
                self.write_register(rd, loaded);
            }
            ReadWriteKind::Byte => {
                let loaded = u32::from(self.memory.read_byte(address));
                self.memory.write_byte(address, source as u8);
                self.write_register(rd, loaded);
            }
        }
    }

    fn software_interrupt(&mut self, comment: u32) -> Result<ExecStatus, ExecError> {
        match comment {
            // Write the byte in R0 to the terminal.
            0 => {
                self.cycle_seq(1);
                let byte = self.read_register(0) as u8;
                self.append_output(&char::from(byte).to_string());
            }
            // Read one character from the terminal into R0.
            1 => match self.consume_input_char() {
                Some(c) => {
                    self.cycle_seq(1);
                    self.write_register(0, c as u32);
                }
                None => return Ok(ExecStatus::WaitingInput),
            },
            // Halt.
            2 => {
                self.cycle_seq(1);
                self.halt();
            }
            // Read a signed decimal line into R0.
            3 => match self.consume_input_line() {
                Some(line) => {
                    self.cycle_seq(1);
                    let value = line.parse::<i64>().unwrap_or(0);
                    self.write_register(0, value as u32);
                }
                None => return Ok(ExecStatus::WaitingInput),
            },
            // Write R0 as a signed decimal to the terminal.
            4 => {
                self.cycle_seq(1);
                let value = self.read_register(0) as i32;
                self.append_output(&value.to_string());
            }
            n => {
                let mode = self.mode();
                if !mode.is_privileged() || mode == Mode::System {
                    return Err(ExecError::UnknownSwi(n));
                }
                // Privileged modes take the architectural SVC trap so that
                // resident handlers can service the call.
                self.cycle_seq(1);
                let cpsr = self.cpsr();
                let return_address = self.registers.program_counter();
                self.registers.set_spsr(Mode::Supervisor, cpsr);
                self.registers
                    .set(14, Mode::Supervisor, return_address);
                let mut new_cpsr = cpsr;
                new_cpsr.set_mode(Mode::Supervisor);
                new_cpsr.set_irq_disable(true);
                self.registers.set_cpsr(new_cpsr);
                self.write_register(REG_PC, SWI_VECTOR);
                self.cycle_pipeline_flush();
            }
        }

        Ok(ExecStatus::Completed)
    }
}

fn logical(result: u32, shifter_carry: bool) -> ArithmeticOpResult {
    ArithmeticOpResult {
        result,
        carry: shifter_carry,
        overflow: false,
        sign: result & (1 << 31) != 0,
        zero: result == 0,
    }
}

/// Early-termination heuristic of the ARM7 multiplier: each leading byte
/// that is all zeroes or all ones shaves one internal cycle off `base`.
fn leading_multiplier_cycles(multiplier: u32, base: u64) -> u64 {
    let mut cycles = base;
    for mask in [0xFF00_0000u32, 0xFFFF_0000, 0xFFFF_FF00] {
        if multiplier & mask == 0 || multiplier & mask == mask {
            cycles -= 1;
        }
    }
    cycles
}

/// Unsigned long multiplies only terminate early on leading zeroes.
fn leading_zero_cycles(multiplier: u32, base: u64) -> u64 {
    let mut cycles = base;
    for mask in [0xFF00_0000u32, 0xFFFF_0000, 0xFFFF_FF00] {
        if multiplier & mask == 0 {
            cycles -= 1;
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::arm7tdmi::{RunState, StepEvent};
    use pretty_assertions::assert_eq;

    fn cpu_with(words: &[u32]) -> Arm7tdmi {
        let mut cpu = Arm7tdmi::default();
        cpu.memory.write_words(0, words);
        cpu
    }

    fn run_to_halt(cpu: &mut Arm7tdmi) {
        for _ in 0..10_000 {
            if !cpu.is_running() {
                return;
            }
            cpu.step();
        }
        panic!("program did not halt");
    }

    fn reg(cpu: &Arm7tdmi, r: u32) -> u32 {
        cpu.registers.get(r, cpu.mode())
    }

    #[test]
    fn mov_immediate_with_rotation() {
        // MOV R0, #0xFF000000 (0xFF ROR 8)
        let mut cpu = cpu_with(&[0xE3A0_04FF, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 0), 0xFF00_0000);
    }

    #[test]
    fn add_sets_flags() {
        // MOV R0, #0xFF000000; ADDS R1, R0, R0 -> carry out, no overflow
        let mut cpu = cpu_with(&[0xE3A0_04FF, 0xE090_1000, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 1), 0xFE00_0000);
        assert!(cpu.cpsr().carry_flag());
        assert!(!cpu.cpsr().overflow_flag());
        assert!(cpu.cpsr().sign_flag());
        assert!(!cpu.cpsr().zero_flag());
    }

    #[test]
    fn subs_carry_means_no_borrow() {
        // MOV R0, #5; SUBS R1, R0, #3
        let mut cpu = cpu_with(&[0xE3A0_0005, 0xE250_1003, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 1), 2);
        assert!(cpu.cpsr().carry_flag());

        // MOV R0, #3; SUBS R1, R0, #5 -> borrow, C clear, negative
        let mut cpu = cpu_with(&[0xE3A0_0003, 0xE250_1005, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 1), 3u32.wrapping_sub(5));
        assert!(!cpu.cpsr().carry_flag());
        assert!(cpu.cpsr().sign_flag());
    }

    #[test]
    fn logical_s_takes_carry_from_shifter() {
        // MOV R0, #3; MOVS R1, R0, LSR #1 -> carry out from bit 0
        let mut cpu = cpu_with(&[0xE3A0_0003, 0xE1B0_10A0, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 1), 1);
        assert!(cpu.cpsr().carry_flag());
    }

    #[test]
    fn adc_uses_carry_in() {
        // CMP R0, #0 (sets C since 0 - 0 has no borrow)
        // ADC R1, R0, #0 -> 0 + 0 + 1
        let mut cpu = cpu_with(&[0xE350_0000, 0xE2A0_1000, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 1), 1);
    }

    #[test]
    fn pc_reads_observe_plus_8() {
        // MOV R0, R15 at address 0 -> 8
        let mut cpu = cpu_with(&[0xE1A0_000F, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 0), 8);
    }

    #[test]
    fn branch_with_link() {
        // 0x0: BL 0x10 ; offset = (0x10 - 0x8) = 8 -> field 2
        let mut cpu = cpu_with(&[0xEB00_0002]);
        cpu.memory.write_word(0x10, 0xEF00_0002);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 14), 4);
        assert_eq!(cpu.previous_pc(), 0x10);
        // Branch costs 2S + 1N.
        let (n, s, _i) = cpu.cycles();
        assert_eq!(n, 1);
        assert!(s >= 2);
    }

    #[test]
    fn data_processing_to_pc_branches() {
        // MOV R15, #16; target: SWI 2
        let mut cpu = cpu_with(&[0xE3A0_F010]);
        cpu.memory.write_word(0x10, 0xEF00_0002);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.previous_pc(), 0x10);
        assert_eq!(*cpu.state(), Ok(RunState::Stopped));
    }

    #[test]
    fn str_then_ldr_round_trips() {
        // MOV R0, #0xAB; MOV R1, #0x80; STR R0, [R1]; LDR R2, [R1]
        let mut cpu = cpu_with(&[
            0xE3A0_00AB,
            0xE3A0_1080,
            0xE581_0000,
            0xE591_2000,
            0xEF00_0002,
        ]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 2), 0xAB);
        assert_eq!(cpu.memory.read_word(0x80), 0xAB);
    }

    #[test]
    fn ldr_with_base_writeback_loaded_value_wins() {
        // MOV R1, #0x80; LDR R1, [R1], #4 (post-index writes back, load wins)
        let mut cpu = cpu_with(&[0xE3A0_1080, 0xE491_1004, 0xEF00_0002]);
        cpu.memory.write_word(0x80, 0x1234_5678);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 1), 0x1234_5678);
    }

    #[test]
    fn str_base_writeback_stores_original_base() {
        // MOV R1, #0x80; STR R1, [R1, #4]!
        let mut cpu = cpu_with(&[0xE3A0_1080, 0xE5A1_1004, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        // The stored value is the original base, the register is stepped.
        assert_eq!(cpu.memory.read_word(0x84), 0x80);
        assert_eq!(reg(&cpu, 1), 0x84);
    }

    #[test]
    fn strh_ldrh_rotation_and_sign_extension() {
        // MOV R0, #0xDC; ORR R0, R0, #0xFE00  (R0 = 0xFEDC)
        // MOV R1, #0x80; STRH R0, [R1]; LDRH R2, [R1]
        // LDRSH R3, [R1]
        let mut cpu = cpu_with(&[
            0xE3A0_00DC,
            0xE380_0CFE,
            0xE3A0_1080,
            0xE1C1_00B0,
            0xE1D1_20B0,
            0xE1D1_30F0,
            0xEF00_0002,
        ]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 2), 0x0000_FEDC);
        assert_eq!(reg(&cpu, 3), 0xFFFF_FEDC);
    }

    #[test]
    fn ldrsb_sign_extends() {
        // MOV R1, #0x80; MOV R0, #0x90; STRB R0, [R1]; LDRSB R2, [R1]
        let mut cpu = cpu_with(&[
            0xE3A0_1080,
            0xE3A0_0090,
            0xE5C1_0000,
            0xE1D1_20D0,
            0xEF00_0002,
        ]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 2), 0xFFFF_FF90);
    }

    #[test]
    fn stm_ldm_round_trip() {
        // MOV R0, #1; MOV R1, #2; MOV R13, #0x100
        // STMDB R13!, {R0, R1}; MOV R0, #0; MOV R1, #0
        // LDMIA R13!, {R0, R1}
        let mut cpu = cpu_with(&[
            0xE3A0_0001,
            0xE3A0_1002,
            0xE3A0_DC01,
            0xE92D_0003,
            0xE3A0_0000,
            0xE3A0_1000,
            0xE8BD_0003,
            0xEF00_0002,
        ]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 0), 1);
        assert_eq!(reg(&cpu, 1), 2);
        assert_eq!(reg(&cpu, 13), 0x100);
    }

    #[test]
    fn stm_empty_list_transfers_sixteen_words() {
        // MOV R0, #0x100; STMIA R0!, {}
        let mut cpu = cpu_with(&[0xE3A0_0C01, 0xE8A0_0000, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        // Base advanced by 0x40 and all sixteen registers were stored.
        assert_eq!(reg(&cpu, 0), 0x140);
        // Slot of R0 stored the original base.
        assert_eq!(cpu.memory.read_word(0x100), 0x100);
        // R15 slot observes pc + 12.
        assert_eq!(cpu.memory.read_word(0x13C), 4 + 12);
    }

    #[test]
    fn stm_base_in_list_first_stores_original_base() {
        // MOV R0, #0x100; MOV R1, #7; STMDB R0!, {R0, R1}
        let mut cpu = cpu_with(&[0xE3A0_0C01, 0xE3A0_1007, 0xE920_0003, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        // R0 is the lowest register of the list: the original base lands at
        // the lower address.
        assert_eq!(cpu.memory.read_word(0xF8), 0x100);
        assert_eq!(cpu.memory.read_word(0xFC), 7);
        assert_eq!(reg(&cpu, 0), 0xF8);
    }

    #[test]
    fn stm_base_in_list_not_first_stores_updated_base() {
        // MOV R1, #0x100; MOV R0, #7; STMDB R1!, {R0, R1}
        let mut cpu = cpu_with(&[0xE3A0_1C01, 0xE3A0_0007, 0xE921_0003, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.memory.read_word(0xF8), 7);
        // R1 is not the lowest register: the written-back value is stored.
        assert_eq!(cpu.memory.read_word(0xFC), 0xF8);
    }

    #[test]
    fn swp_swaps_atomically() {
        // MOV R1, #0x80; MOV R2, #5; SWP R0, R2, [R1]
        let mut cpu = cpu_with(&[0xE3A0_1080, 0xE3A0_2005, 0xE101_0092, 0xEF00_0002]);
        cpu.memory.write_word(0x80, 99);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 0), 99);
        assert_eq!(cpu.memory.read_word(0x80), 5);
    }

    #[test]
    fn multiply_and_accumulate() {
        // MOV R2, #6; MOV R3, #7; MUL R4, R2, R3; MLA R5, R2, R3, R4
        let mut cpu = cpu_with(&[
            0xE3A0_2006,
            0xE3A0_3007,
            0xE004_0392,
            0xE025_4392,
            0xEF00_0002,
        ]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 4), 42);
        assert_eq!(reg(&cpu, 5), 84);
    }

    #[test]
    fn multiply_long_signed() {
        // MVN R2, #0 (-1); MOV R3, #2; SMULL R4, R5, R2, R3 -> -2
        let mut cpu = cpu_with(&[0xE3E0_2000, 0xE3A0_3002, 0xE0C5_4392, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 4), 0xFFFF_FFFE);
        assert_eq!(reg(&cpu, 5), 0xFFFF_FFFF);
    }

    #[test]
    fn multiply_long_unsigned_accumulate() {
        // MOV R4, #1; MOV R5, #0; MVN R2, #0; MOV R3, #2
        // UMLAL R4, R5, R2, R3: 0xFFFFFFFF * 2 + 1 = 0x1FFFFFFFF
        let mut cpu = cpu_with(&[
            0xE3A0_4001,
            0xE3A0_5000,
            0xE3E0_2000,
            0xE3A0_3002,
            0xE0A5_4392,
            0xEF00_0002,
        ]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 4), 0xFFFF_FFFF);
        assert_eq!(reg(&cpu, 5), 1);
    }

    #[test]
    fn msr_flags_enable_conditional_branch() {
        // MSR CPSR_flg, #0x40000000 (set Z); MOVEQ R0, #1
        let mut cpu = cpu_with(&[0xE328_F102, 0x03A0_0001, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert!(cpu.cpsr().zero_flag());
        assert_eq!(reg(&cpu, 0), 1);
    }

    #[test]
    fn msr_cpsr_invalid_mode_faults() {
        // Supervisor mode; MSR CPSR, R0 with R0 = 0 (no architected mode).
        let mut cpu = cpu_with(&[0xE129_F000]);
        cpu.registers.set_cpsr(Psr::from(Mode::Supervisor));
        assert_eq!(cpu.step(), StepEvent::Idle);
        assert_eq!(*cpu.state(), Err("invalid mode 0b00000".to_owned()));
    }

    #[test]
    fn msr_mode_switch_banks_registers() {
        // Start in Supervisor; MOV R13, #1; switch to IRQ; MOV R13, #2;
        // back to Supervisor and check R13 is still 1.
        let mut cpu = cpu_with(&[
            0xE3A0_D001, // MOV R13, #1
            0xE3A0_0012, // MOV R0, #0x12 (IRQ)
            0xE129_F000, // MSR CPSR, R0
            0xE3A0_D002, // MOV R13, #2
            0xE3A0_0013, // MOV R0, #0x13 (SVC)
            0xE129_F000, // MSR CPSR, R0
            0xEF00_0002,
        ]);
        cpu.registers.set_cpsr(Psr::from(Mode::Supervisor));
        run_to_halt(&mut cpu);
        assert_eq!(cpu.mode(), Mode::Supervisor);
        assert_eq!(cpu.registers.get(13, Mode::Supervisor), 1);
        assert_eq!(cpu.registers.get(13, Mode::Irq), 2);
    }

    #[test]
    fn mrs_reads_cpsr() {
        // MSR CPSR_flg, #0xF0000000; MRS R0, CPSR
        let mut cpu = cpu_with(&[0xE328_F4F0, 0xE10F_0000, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(reg(&cpu, 0) & 0xF000_0000, 0xF000_0000);
    }

    #[test]
    fn swi_trap_from_privileged_mode_enters_supervisor() {
        let mut cpu = cpu_with(&[0xEF00_0064]); // SWI 100
        cpu.registers.set_cpsr(Psr::from(Mode::Irq));
        // Handler at 0x08: SWI 2 halts.
        cpu.memory.write_word(0x08, 0xEF00_0002);
        run_to_halt(&mut cpu);
        assert_eq!(*cpu.state(), Ok(RunState::Stopped));
        assert_eq!(cpu.mode(), Mode::Supervisor);
        // Return address and saved PSR landed in the SVC bank.
        assert_eq!(cpu.registers.get(14, Mode::Supervisor), 4);
        assert_eq!(
            cpu.registers.spsr(Mode::Supervisor).map(u32::from),
            Some(u32::from(Psr::from(Mode::Irq)))
        );
    }

    #[test]
    fn swi_4_prints_signed_decimal() {
        // MVN R0, #122 (-123); SWI 4
        let mut cpu = cpu_with(&[0xE3E0_007A, 0xEF00_0004, 0xEF00_0002]);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.output(), "-123");
    }

    #[test]
    fn swi_1_reads_a_character() {
        let mut cpu = cpu_with(&[0xEF00_0001, 0xEF00_0000, 0xEF00_0002]);
        assert_eq!(cpu.step(), StepEvent::WaitingInput);
        // The instruction was rolled back.
        assert_eq!(cpu.registers.program_counter(), 0);

        cpu.set_input("hi".to_owned());
        run_to_halt(&mut cpu);
        assert_eq!(cpu.output(), "h");
        assert_eq!(cpu.input(), "i");
        assert!(cpu.take_input_dirty());
    }

    #[test]
    fn swi_3_reads_a_decimal_line() {
        let mut cpu = cpu_with(&[0xEF00_0003, 0xEF00_0004, 0xEF00_0002]);
        cpu.set_input("42".to_owned());
        // Without a newline the line is not complete yet.
        assert_eq!(cpu.step(), StepEvent::WaitingInput);

        cpu.set_input("42\n".to_owned());
        run_to_halt(&mut cpu);
        assert_eq!(cpu.output(), "42");
    }

    #[test]
    fn bx_to_thumb_faults() {
        // MOV R0, #0x11; BX R0
        let mut cpu = cpu_with(&[0xE3A0_0011, 0xE12F_FF10]);
        cpu.step();
        assert_eq!(cpu.step(), StepEvent::Idle);
        assert!(matches!(cpu.state(), Err(msg) if msg.contains("thumb")));
    }

    #[test]
    fn conditional_chain_matches_flag_updates() {
        // CMP R0, #0 -> Z set; BNE skips; BEQ taken to halt.
        let mut cpu = cpu_with(&[
            0xE350_0000, // CMP R0, #0
            0x1A00_0002, // BNE +2 (not taken)
            0x0A00_0000, // BEQ 0x10
            0xE7F0_00F0, // undefined (skipped)
            0xEF00_0002, // 0x10: SWI 2
        ]);
        run_to_halt(&mut cpu);
        assert_eq!(*cpu.state(), Ok(RunState::Stopped));
    }
}
