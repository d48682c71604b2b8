//! The host command surface.
//!
//! A [`Controller`] owns the processor and the loaded program behind one
//! exclusive lock. Every command locks, runs to completion and unlocks, so
//! concurrent host tasks serialize in arrival order and queries always see a
//! consistent snapshot. Nothing hands out live references into memory or
//! registers; every answer is a value.
//!
//! The "play" loop lives in the host: it calls [`Controller::step_times`]
//! with its simulation speed as the batch size, and the core stops a batch
//! early on halt, fault, breakpoint or a pending input request.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::asm::{self, Diagnostic};
use crate::cpu::arm::disassembler::PrettyInstr;
use crate::cpu::arm::instructions::ArmModeInstruction;
use crate::cpu::arm7tdmi::{Arm7tdmi, RunState, StepEvent};
use crate::cpu::condition::Condition;
use crate::cpu::registers::PHYSICAL_REGISTERS;
use crate::program::Program;

/// Snapshot returned by the `processor_info` query.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorInfo {
    /// Name of the loaded file, when the program came from one.
    pub file: Option<String>,

    /// `Ok(Running | Stopped)` or `Err(fault message)`.
    pub state: Result<RunState, String>,

    pub previous_pc: u32,

    /// Condition field of the last decoded instruction.
    pub current_cond: Condition,

    pub steps: u64,
    pub nonseq_cycles: u64,
    pub seq_cycles: u64,
    pub internal_cycles: u64,

    /// Terminal output accumulated by the SWI handlers.
    pub output: String,
}

/// Snapshot returned by the `registers` query: the 37-slot flat view with
/// the CPSR pinned at index 31.
#[derive(Debug, Clone)]
pub struct RegistersPayload {
    pub regs: [u32; PHYSICAL_REGISTERS],
}

impl Serialize for RegistersPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("RegistersPayload", 1)?;
        state.serialize_field("regs", self.regs.as_slice())?;
        state.end()
    }
}

/// Answer to the `line_at` query: one memory word with its disassembly and
/// the source comment recorded for that address.
#[derive(Debug, Clone, Serialize)]
pub struct LineInfo {
    pub value: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instr: Option<PrettyInstr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

struct Core {
    processor: Arm7tdmi,
    program: Option<Program>,
    file: Option<String>,
}

/// Serializes all host commands over the processor instance.
#[derive(Clone)]
pub struct Controller {
    core: Arc<Mutex<Core>>,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            core: Arc::new(Mutex::new(Core {
                processor: Arm7tdmi::default(),
                program: None,
                file: None,
            })),
        }
    }
}

impl Controller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembles `contents` and, on success, replaces the current program
    /// and soft-resets. On error nothing is loaded and the full diagnostic
    /// list is returned.
    pub fn load_program(
        &self,
        file: Option<String>,
        contents: &str,
    ) -> Result<(), Vec<Diagnostic>> {
        let program = asm::assemble(contents)?;

        let mut core = self.lock();
        core.processor.memory.clear();
        core.processor.memory.write_words(0, &program.image);
        core.processor.reset_soft();
        logger::log(format!(
            "loaded program ({} words, {} symbols)",
            program.image.len(),
            program.symbols.len()
        ));
        core.program = Some(program);
        core.file = file;
        Ok(())
    }

    /// Reads and assembles a source file. I/O failures surface as a single
    /// diagnostic on line 0.
    pub fn load_program_path(&self, path: &Path) -> Result<(), Vec<Diagnostic>> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            vec![Diagnostic {
                line_number: 0,
                error: format!("cannot read {}: {err}", path.display()),
            }]
        })?;
        self.load_program(
            path.file_name().map(|n| n.to_string_lossy().into_owned()),
            &contents,
        )
    }

    /// Soft reset restarts the program; hard reset also clears memory,
    /// registers and drops the program.
    pub fn reset(&self, hard: bool) {
        let mut core = self.lock();
        if hard {
            core.processor.reset_hard();
            core.program = None;
            core.file = None;
        } else {
            // Memory is preserved: a program that modified itself or its
            // data restarts against that state.
            core.processor.reset_soft();
        }
    }

    /// Executes at most `steps` instructions, stopping early on halt, fault,
    /// breakpoint or a pending input request. Returns the remaining input
    /// buffer when the program consumed input during the batch, so the host
    /// can refresh its terminal echo.
    pub fn step_times(&self, steps: u32) -> Option<String> {
        let mut core = self.lock();
        let mut consumed_input = false;

        for _ in 0..steps {
            match core.processor.step() {
                StepEvent::Retired => {
                    consumed_input |= core.processor.take_input_dirty();
                }
                StepEvent::Breakpoint(addr) => {
                    logger::log(format!("breakpoint hit at {addr:#010X}"));
                    break;
                }
                StepEvent::WaitingInput | StepEvent::Idle => break,
            }
        }

        consumed_input.then(|| core.processor.input().to_owned())
    }

    #[must_use]
    pub fn processor_info(&self) -> ProcessorInfo {
        let core = self.lock();
        let (nonseq_cycles, seq_cycles, internal_cycles) = core.processor.cycles();
        ProcessorInfo {
            file: core.file.clone(),
            state: core.processor.state().clone(),
            previous_pc: core.processor.previous_pc(),
            current_cond: core.processor.current_cond(),
            steps: core.processor.steps(),
            nonseq_cycles,
            seq_cycles,
            internal_cycles,
            output: core.processor.output().to_owned(),
        }
    }

    #[must_use]
    pub fn registers(&self) -> RegistersPayload {
        RegistersPayload {
            regs: self.lock().processor.register_snapshot(),
        }
    }

    /// Disassembles the memory word at `addr` together with the source
    /// comment its line carried, if the assembler emitted it.
    #[must_use]
    pub fn line_at(&self, addr: u32) -> LineInfo {
        let core = self.lock();
        let value = core.processor.memory.read_word_aligned(addr);
        let instruction = ArmModeInstruction::from(value);
        LineInfo {
            value,
            instr: match instruction {
                ArmModeInstruction::Undefined => None,
                _ => Some(instruction.pretty(addr)),
            },
            comment: core
                .program
                .as_ref()
                .and_then(|program| program.line_at(addr))
                .and_then(|line| line.comment.clone()),
        }
    }

    /// Sets or clears a breakpoint.
    pub fn breakpoint(&self, addr: u32, set: bool) {
        self.lock().processor.set_breakpoint(addr, set);
    }

    /// Acknowledges the breakpoint currently stopping the processor, so the
    /// next batch resumes through it.
    pub fn hit_breakpoint(&self) {
        self.lock().processor.acknowledge_breakpoint();
    }

    /// Replaces the pending terminal input buffer.
    pub fn set_user_input(&self, user_input: String) {
        self.lock().processor.set_input(user_input);
    }

    /// Runs a closure against the processor under the lock. Test and
    /// harness hook; hosts use the query commands instead.
    pub fn with_processor<R>(&self, f: impl FnOnce(&mut Arm7tdmi) -> R) -> R {
        f(&mut self.lock().processor)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().unwrap()
    }
}
