//! Test runner for assembly programs annotated with `;!` expectations.
//!
//! A program declares its expected end state in comments:
//!
//! ```text
//! ;! halts 2            ; the SWI number that ends the run
//! ;! output 37/6=6r1    ; expected terminal output
//! ;! r4 6               ; expected register value at halt
//! ```
//!
//! `halts 2` expects a clean stop; any other number expects the run to end
//! in the `SWI <n>` fault. Register expectations may name labels, which are
//! resolved against the program's symbol table.

use thiserror::Error;

use crate::asm::{self, Diagnostic};
use crate::cpu::arm7tdmi::{Arm7tdmi, RunState, StepEvent};

/// Step budget for one harness run; programs are expected to halt long
/// before this.
const MAX_STEPS: u32 = 1_000_000;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("assembly failed:\n{}", format_diagnostics(.0))]
    Assembly(Vec<Diagnostic>),

    #[error("program did not halt within {MAX_STEPS} steps")]
    DidNotHalt,

    #[error("program is blocked waiting for input")]
    WaitingInput,

    #[error("expected halt via SWI {expected}, but the run ended as {actual}")]
    WrongHalt { expected: u32, actual: String },

    #[error("expected output {expected:?}, got {actual:?}")]
    WrongOutput { expected: String, actual: String },

    #[error("expected R{register} = {expected:#X}, got {actual:#X}")]
    WrongRegister {
        register: usize,
        expected: u32,
        actual: u32,
    },

    #[error("cannot interpret expected value `{0}`")]
    BadExpectation(String),
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assembles and runs `src` to completion, then checks every declared
/// expectation.
pub fn run_source(src: &str) -> Result<(), HarnessError> {
    run_source_with_input(src, "")
}

/// As [`run_source`], with terminal input preloaded.
pub fn run_source_with_input(src: &str, input: &str) -> Result<(), HarnessError> {
    let program = asm::assemble(src).map_err(HarnessError::Assembly)?;

    let mut cpu = Arm7tdmi::default();
    cpu.memory.write_words(0, &program.image);
    cpu.set_input(input.to_owned());

    let mut budget = MAX_STEPS;
    while cpu.is_running() {
        if budget == 0 {
            return Err(HarnessError::DidNotHalt);
        }
        budget -= 1;
        if cpu.step() == StepEvent::WaitingInput {
            return Err(HarnessError::WaitingInput);
        }
    }

    let expectations = &program.expectations;

    if let Some(halts) = expectations.halts {
        let clean_stop = *cpu.state() == Ok(RunState::Stopped);
        let matches = if halts == 2 {
            clean_stop
        } else {
            *cpu.state() == Err(format!("SWI {halts}"))
        };
        if !matches {
            return Err(HarnessError::WrongHalt {
                expected: halts,
                actual: match cpu.state() {
                    Ok(state) => format!("{state:?}"),
                    Err(message) => message.clone(),
                },
            });
        }
    }

    if let Some(expected) = &expectations.output {
        if cpu.output() != expected {
            return Err(HarnessError::WrongOutput {
                expected: expected.clone(),
                actual: cpu.output().to_owned(),
            });
        }
    }

    for (register, value_text) in &expectations.registers {
        let expected = resolve_value(value_text, &program)?;
        let actual = cpu.registers.get(*register as u32, cpu.mode());
        if actual != expected {
            return Err(HarnessError::WrongRegister {
                register: *register,
                expected,
                actual,
            });
        }
    }

    Ok(())
}

/// An expected value: a decimal (possibly negative), `0x` hex, or a label.
fn resolve_value(text: &str, program: &crate::program::Program) -> Result<u32, HarnessError> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if let Ok(value) = u32::from_str_radix(hex, 16) {
            return Ok(value);
        }
    }
    if let Ok(value) = text.parse::<i64>() {
        return Ok(value as u32);
    }
    if let Some(value) = program.symbol(text) {
        return Ok(value as u32);
    }
    Err(HarnessError::BadExpectation(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_program() {
        run_source(
            "\
;! halts 2
;! output A
;! r0 65
        mov r0, #'A'
        swi 0
        swi 2
",
        )
        .unwrap();
    }

    #[test]
    fn wrong_register_is_reported() {
        let err = run_source(
            "\
;! halts 2
;! r0 1
        mov r0, #2
        swi 2
",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::WrongRegister {
                register: 0,
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn expected_fault_halt() {
        run_source(
            "\
;! halts 100
        swi 100
",
        )
        .unwrap();
    }

    #[test]
    fn label_expectation_resolves() {
        run_source(
            "\
;! halts 2
;! r0 data
        adr r0, data
        swi 2
data    dw 0
",
        )
        .unwrap();
    }

    #[test]
    fn missing_halt_is_reported() {
        let err = run_source(";! halts 2\nloop b loop\n").unwrap_err();
        assert!(matches!(err, HarnessError::DidNotHalt));
    }
}
