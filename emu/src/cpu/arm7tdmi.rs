//! The processor: fetch/decode/execute stepping, run state, cycle counters,
//! breakpoints and the software-interrupt terminal.
//!
//! ## Stepping model
//!
//! One [`Arm7tdmi::step`] executes at most one instruction:
//!
//! 1. read `pc` from R15 and remember it as `previous_pc`;
//! 2. stop without retiring anything when `pc` carries an unacknowledged
//!    breakpoint;
//! 3. fetch the word at `pc` and record its condition field;
//! 4. advance R15 by 4 **before** executing, so that R15 reads during
//!    execution observe `pc + 8` (the three-stage pipeline effect);
//! 5. evaluate the condition; a false predicate retires as one internal
//!    cycle;
//! 6. decode and dispatch to the class handler.
//!
//! Writes to R15 take effect directly: the next fetch happens from the
//! written (word-aligned) address.
//!
//! ## Faults
//!
//! Runtime faults (undefined instructions, unknown SWI numbers in an
//! unprivileged mode, writes of unrecognised CPSR modes) latch the run state
//! to `Err(message)`. The faulting step is not counted as retired; cycle
//! counters keep whatever was attributed before the fault. Further stepping
//! is a no-op until a reset.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::bitwise::Bits;
use crate::cpu::arm::operations::SIZE_OF_INSTRUCTION;
use crate::cpu::condition::Condition;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;
use crate::cpu::registers::{RegisterFile, PHYSICAL_REGISTERS};
use crate::memory::Memory;

/// The two live phases of the run state; faults are carried separately as
/// `Err(message)` in [`Arm7tdmi::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    Stopped,
}

/// A runtime fault. The rendered message is host-visible.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("undefined instruction")]
    UndefinedInstruction,

    /// An SWI number without a terminal binding, raised from USR or SYS
    /// where no handler could be installed.
    #[error("SWI {0}")]
    UnknownSwi(u32),

    #[error("no SPSR in {0} mode")]
    NoSpsr(Mode),

    /// A PSR write tried to set mode bits that name no architected mode.
    #[error("invalid mode 0b{0:05b}")]
    InvalidMode(u32),

    #[error("branch into thumb state is not supported")]
    ThumbState,
}

/// What a single [`Arm7tdmi::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    /// An instruction retired (or was skipped by its condition).
    Retired,

    /// An unacknowledged breakpoint at this address stopped the processor
    /// before the instruction executed.
    Breakpoint(u32),

    /// An input-consuming SWI found the buffer empty; the instruction was
    /// rolled back and will re-execute once input arrives.
    WaitingInput,

    /// The run state is `Stopped` or faulted; nothing was executed.
    Idle,
}

/// Outcome of one instruction execution, used between the class handlers and
/// the step loop.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ExecStatus {
    Completed,
    WaitingInput,
}

/// Mirrors the three bus cycle classes of the ARM7 data sheet. Estimated
/// wall time keeps their 2:1:1 weighting: `(2·N + S + I) / 100` µs.
pub struct Arm7tdmi {
    pub memory: Memory,
    pub registers: RegisterFile,

    state: Result<RunState, String>,
    previous_pc: u32,
    current_cond: Condition,
    steps: u64,
    nonseq_cycles: u64,
    seq_cycles: u64,
    internal_cycles: u64,

    breakpoints: BTreeSet<u32>,
    /// Breakpoint address the host acknowledged; execution may pass it once.
    acknowledged_breakpoint: Option<u32>,

    output: String,
    input: String,
    /// Set whenever an SWI consumed input, cleared when the host reads it.
    input_dirty: bool,
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        Self {
            memory: Memory::default(),
            registers: RegisterFile::default(),
            state: Ok(RunState::Running),
            previous_pc: 0,
            current_cond: Condition::AL,
            steps: 0,
            nonseq_cycles: 0,
            seq_cycles: 0,
            internal_cycles: 0,
            breakpoints: BTreeSet::new(),
            acknowledged_breakpoint: None,
            output: String::new(),
            input: String::new(),
            input_dirty: false,
        }
    }
}

impl Arm7tdmi {
    #[must_use]
    pub fn state(&self) -> &Result<RunState, String> {
        &self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == Ok(RunState::Running)
    }

    pub(crate) fn halt(&mut self) {
        self.state = Ok(RunState::Stopped);
    }

    /// The operating mode used for register banking. An ill-defined CPSR
    /// mode field banks as User.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.registers.cpsr().mode().unwrap_or(Mode::User)
    }

    #[must_use]
    pub fn cpsr(&self) -> Psr {
        self.registers.cpsr()
    }

    #[must_use]
    pub fn previous_pc(&self) -> u32 {
        self.previous_pc
    }

    #[must_use]
    pub fn current_cond(&self) -> Condition {
        self.current_cond
    }

    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    #[must_use]
    pub fn cycles(&self) -> (u64, u64, u64) {
        (self.nonseq_cycles, self.seq_cycles, self.internal_cycles)
    }

    /// Estimated execution time in microseconds, weighting non-sequential
    /// cycles double.
    #[must_use]
    pub fn estimated_time_micros(&self) -> f64 {
        (2 * self.nonseq_cycles + self.seq_cycles + self.internal_cycles) as f64 / 100.0
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Replaces the pending terminal input buffer.
    pub fn set_input(&mut self, input: String) {
        self.input = input;
    }

    /// True once since input was last consumed by the program.
    pub fn take_input_dirty(&mut self) -> bool {
        std::mem::take(&mut self.input_dirty)
    }

    pub fn set_breakpoint(&mut self, addr: u32, set: bool) {
        if set {
            self.breakpoints.insert(addr);
        } else {
            self.breakpoints.remove(&addr);
        }
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BTreeSet<u32> {
        &self.breakpoints
    }

    /// Acknowledges the breakpoint the processor is stopped on, so that
    /// resuming executes the instruction under it instead of re-stopping.
    pub fn acknowledge_breakpoint(&mut self) {
        self.acknowledged_breakpoint = Some(self.registers.program_counter());
        if self.state == Ok(RunState::Stopped) {
            self.state = Ok(RunState::Running);
        }
    }

    /// Soft reset: the program restarts. PC returns to 0 and the run state
    /// to `Running`; memory and general registers are preserved.
    pub fn reset_soft(&mut self) {
        self.registers.set_program_counter(0);
        self.restart_run_state();
    }

    /// Hard reset: all 37 registers and the whole address space return to 0.
    pub fn reset_hard(&mut self) {
        self.registers.clear();
        self.memory.clear();
        self.restart_run_state();
    }

    fn restart_run_state(&mut self) {
        self.state = Ok(RunState::Running);
        self.previous_pc = 0;
        self.current_cond = Condition::AL;
        self.steps = 0;
        self.nonseq_cycles = 0;
        self.seq_cycles = 0;
        self.internal_cycles = 0;
        self.acknowledged_breakpoint = None;
        self.output.clear();
        self.input.clear();
        self.input_dirty = false;
    }

    pub(crate) fn cycle_nonseq(&mut self, count: u64) {
        self.nonseq_cycles += count;
    }

    pub(crate) fn cycle_seq(&mut self, count: u64) {
        self.seq_cycles += count;
    }

    pub(crate) fn cycle_internal(&mut self, count: u64) {
        self.internal_cycles += count;
    }

    /// A pipeline flush costs one further fetch pair.
    pub(crate) fn cycle_pipeline_flush(&mut self) {
        self.nonseq_cycles += 1;
        self.seq_cycles += 1;
    }

    /// Reads a visible register the way an executing instruction does: R15
    /// observes the current instruction address + 8.
    #[must_use]
    pub(crate) fn read_register(&self, reg: u32) -> u32 {
        let value = self.registers.get(reg, self.mode());
        if reg == 15 {
            value.wrapping_add(4)
        } else {
            value
        }
    }

    /// Writes a visible register. A write to R15 redirects the next fetch;
    /// R15 stays word-aligned in ARM state.
    pub(crate) fn write_register(&mut self, reg: u32, value: u32) {
        if reg == 15 {
            self.registers.set_program_counter(value & !0b11);
        } else {
            let mode = self.mode();
            self.registers.set(reg, mode, value);
        }
    }

    pub(crate) fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Pops one character of pending input, if any.
    pub(crate) fn consume_input_char(&mut self) -> Option<char> {
        let c = self.input.chars().next()?;
        self.input.drain(..c.len_utf8());
        self.input_dirty = true;
        Some(c)
    }

    /// Pops one newline-terminated line of pending input, if any.
    pub(crate) fn consume_input_line(&mut self) -> Option<String> {
        let end = self.input.find('\n')?;
        let line: String = self.input.drain(..=end).collect();
        self.input_dirty = true;
        Some(line.trim().to_owned())
    }

    /// Executes at most one instruction. See the module documentation for
    /// the exact pipeline semantics.
    pub fn step(&mut self) -> StepEvent {
        if !self.is_running() {
            return StepEvent::Idle;
        }

        let pc = self.registers.program_counter();

        if self.breakpoints.contains(&pc) && self.acknowledged_breakpoint != Some(pc) {
            self.state = Ok(RunState::Stopped);
            self.acknowledged_breakpoint = None;
            return StepEvent::Breakpoint(pc);
        }

        self.previous_pc = pc;
        let word = self.memory.read_word_aligned(pc);
        self.current_cond = Condition::from(word.get_bits(28..=31) as u8);

        // R15 advances before execution so that reads observe pc + 8.
        self.registers
            .set_program_counter(pc.wrapping_add(SIZE_OF_INSTRUCTION));

        if !self.registers.cpsr().can_execute(self.current_cond) {
            self.cycle_internal(1);
            self.steps += 1;
            self.acknowledged_breakpoint = None;
            return StepEvent::Retired;
        }

        match self.execute_arm(word.into()) {
            Ok(ExecStatus::Completed) => {
                self.steps += 1;
                self.acknowledged_breakpoint = None;
                StepEvent::Retired
            }
            Ok(ExecStatus::WaitingInput) => {
                // Re-execute this instruction once input arrives.
                self.registers.set_program_counter(pc);
                StepEvent::WaitingInput
            }
            Err(fault) => {
                self.state = Err(fault.to_string());
                StepEvent::Idle
            }
        }
    }

    /// Flat register view for the host; see [`RegisterFile::snapshot`].
    #[must_use]
    pub fn register_snapshot(&self) -> [u32; PHYSICAL_REGISTERS] {
        self.registers.snapshot(self.mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOV_R0_1: u32 = 0xE3A0_0001; // MOV R0, #1
    const MOVEQ_R0_1: u32 = 0x03A0_0001; // MOVEQ R0, #1
    const SWI_HALT: u32 = 0xEF00_0002; // SWI 2
    const SWI_PUTC: u32 = 0xEF00_0000; // SWI 0
    const B_SELF: u32 = 0xEAFF_FFFE; // B .

    fn processor_with(words: &[u32]) -> Arm7tdmi {
        let mut cpu = Arm7tdmi::default();
        cpu.memory.write_words(0, words);
        cpu
    }

    #[test]
    fn step_advances_pc_and_counters() {
        let mut cpu = processor_with(&[MOV_R0_1, MOV_R0_1]);
        assert_eq!(cpu.step(), StepEvent::Retired);
        assert_eq!(cpu.registers.program_counter(), 4);
        assert_eq!(cpu.steps(), 1);
        assert_eq!(cpu.previous_pc(), 0);
        assert_eq!(cpu.cycles(), (0, 1, 0));
    }

    #[test]
    fn condition_false_retires_as_internal_cycle() {
        let mut cpu = processor_with(&[MOVEQ_R0_1]);
        assert_eq!(cpu.step(), StepEvent::Retired);
        assert_eq!(cpu.registers.get(0, Mode::User), 0);
        assert_eq!(cpu.steps(), 1);
        assert_eq!(cpu.cycles(), (0, 0, 1));
        assert_eq!(cpu.current_cond(), Condition::EQ);
    }

    #[test]
    fn swi_2_halts() {
        let mut cpu = processor_with(&[SWI_HALT, MOV_R0_1]);
        assert_eq!(cpu.step(), StepEvent::Retired);
        assert_eq!(*cpu.state(), Ok(RunState::Stopped));
        assert_eq!(cpu.step(), StepEvent::Idle);
        assert_eq!(cpu.steps(), 1);
    }

    #[test]
    fn swi_0_writes_terminal_output() {
        let mut cpu = processor_with(&[0xE3A0_0041, SWI_PUTC, SWI_HALT]); // MOV R0, #'A'
        while cpu.is_running() {
            cpu.step();
        }
        assert_eq!(cpu.output(), "A");
    }

    #[test]
    fn unknown_swi_faults_in_user_mode() {
        let mut cpu = processor_with(&[0xEF00_0064]); // SWI 100
        let mut user_cpu_mode = Psr::from(Mode::User);
        user_cpu_mode.set_irq_disable(true);
        cpu.registers.set_cpsr(user_cpu_mode);

        assert_eq!(cpu.step(), StepEvent::Idle);
        assert_eq!(*cpu.state(), Err("SWI 100".to_owned()));
        // The faulting step is not retired.
        assert_eq!(cpu.steps(), 0);
    }

    #[test]
    fn undefined_instruction_faults() {
        let mut cpu = processor_with(&[0xE7F0_00F0]);
        assert_eq!(cpu.step(), StepEvent::Idle);
        assert_eq!(*cpu.state(), Err("undefined instruction".to_owned()));
    }

    #[test]
    fn breakpoint_stops_before_executing() {
        let mut cpu = processor_with(&[MOV_R0_1, MOV_R0_1, SWI_HALT]);
        cpu.set_breakpoint(4, true);

        assert_eq!(cpu.step(), StepEvent::Retired);
        assert_eq!(cpu.step(), StepEvent::Breakpoint(4));
        assert_eq!(*cpu.state(), Ok(RunState::Stopped));
        // The instruction under the breakpoint did not retire.
        assert_eq!(cpu.steps(), 1);
        assert_eq!(cpu.registers.program_counter(), 4);
    }

    #[test]
    fn acknowledged_breakpoint_fires_only_once() {
        let mut cpu = processor_with(&[MOV_R0_1, MOV_R0_1, SWI_HALT]);
        cpu.set_breakpoint(4, true);

        cpu.step();
        assert_eq!(cpu.step(), StepEvent::Breakpoint(4));

        cpu.acknowledge_breakpoint();
        assert!(cpu.is_running());
        assert_eq!(cpu.step(), StepEvent::Retired);
        assert_eq!(cpu.registers.program_counter(), 8);
    }

    #[test]
    fn breakpoint_reached_again_stops_again() {
        // A loop over a breakpoint address must stop on every revisit.
        let mut cpu = processor_with(&[B_SELF]);
        cpu.set_breakpoint(0, true);

        assert_eq!(cpu.step(), StepEvent::Breakpoint(0));
        cpu.acknowledge_breakpoint();
        assert_eq!(cpu.step(), StepEvent::Retired);
        // Branch-to-self lands on the same address: one-shot is spent.
        assert_eq!(cpu.step(), StepEvent::Breakpoint(0));
    }

    #[test]
    fn hard_reset_clears_everything() {
        let mut cpu = processor_with(&[MOV_R0_1, SWI_HALT]);
        cpu.step();
        cpu.step();
        cpu.reset_hard();

        assert!(cpu.register_snapshot().iter().all(|&slot| slot == 0));
        assert_eq!(cpu.memory.read_word(0), 0);
        assert_eq!(cpu.steps(), 0);
        assert_eq!(cpu.cycles(), (0, 0, 0));
        assert!(cpu.is_running());
    }

    #[test]
    fn soft_reset_preserves_memory_and_registers() {
        let mut cpu = processor_with(&[MOV_R0_1, SWI_HALT]);
        cpu.step();
        cpu.step();
        assert_eq!(*cpu.state(), Ok(RunState::Stopped));

        cpu.reset_soft();
        assert!(cpu.is_running());
        assert_eq!(cpu.registers.program_counter(), 0);
        assert_eq!(cpu.memory.read_word(0), MOV_R0_1);
        assert_eq!(cpu.registers.get(0, Mode::User), 1);
    }

    #[test]
    fn estimated_time_ratio() {
        let mut cpu = Arm7tdmi::default();
        cpu.cycle_nonseq(10);
        cpu.cycle_seq(30);
        cpu.cycle_internal(50);
        assert!((cpu.estimated_time_micros() - 1.0).abs() < f64::EPSILON);
    }
}
