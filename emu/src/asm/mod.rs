//! The assembler front-end: source text in, [`Program`] out.
//!
//! Assembly runs in two passes. The first parses every line, assigns
//! addresses (each instruction, `dw` and `adr` emits exactly one word) and
//! collects label definitions. `equ` definitions are then resolved
//! iteratively so they may reference labels and each other. The second pass
//! encodes every item against the full symbol table.
//!
//! Errors never abort early: every line is checked and the full diagnostic
//! list is returned, so nothing loads unless the whole file assembles.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::program::{Program, SourceLine};

pub mod encode;
pub mod lexer;
pub mod parser;
pub mod syntax;

use syntax::{AsmLine, Expectations, LineItem};

/// Everything that can go wrong on one line of assembly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AsmErrorKind {
    #[error("syntax error near `{0}`")]
    Syntax(String),

    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),

    #[error("unexpected trailing input on line: `{0}`")]
    TrailingTokens(String),

    #[error("expected {0}")]
    Expected(String),

    #[error("expected `,`")]
    ExpectedComma,

    #[error("expected a register")]
    ExpectedRegister,

    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),

    #[error("division by zero in constant expression")]
    DivisionByZero,

    #[error("value {0} does not fit in 32 bits")]
    ValueOutOfRange(i64),

    #[error("immediate {0:#X} is not expressible as a rotated 8-bit constant")]
    ImmediateUnencodable(u32),

    #[error("shift amount {0} is out of range")]
    ShiftOutOfRange(i64),

    #[error("register-specified shift amounts are not allowed in transfers")]
    RegisterShiftInTransfer,

    #[error("branch target {0:#X} is not word-aligned")]
    MisalignedBranchTarget(u32),

    #[error("branch target {0:#X} is out of range")]
    BranchOutOfRange(u32),

    #[error("offset {0} is out of range")]
    OffsetOutOfRange(i64),

    #[error("invalid shift")]
    InvalidShift,

    #[error("signed transfers exist only as loads")]
    SignedStore,

    #[error("expected CPSR, SPSR, CPSR_FLG or SPSR_FLG")]
    InvalidPsr,

    #[error("invalid register range")]
    InvalidRegisterRange,

    #[error("`equ` requires a label")]
    EquWithoutLabel,

    #[error("duplicate symbol `{0}`")]
    DuplicateSymbol(String),
}

/// One reported assembly error, tied to its source line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub line_number: usize,
    pub error: String,
}

impl Diagnostic {
    fn new(line_number: usize, kind: &AsmErrorKind) -> Self {
        Self {
            line_number,
            error: kind.to_string(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line_number, self.error)
    }
}

/// Assembles a source file. On any error the full diagnostic list is
/// returned and nothing is produced.
pub fn assemble(src: &str) -> Result<Program, Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    let mut lines = Vec::new();

    for (index, text) in src.lines().enumerate() {
        let line_number = index + 1;
        match parser::parse_line(line_number, text) {
            Ok(line) => lines.push(line),
            Err(kind) => diagnostics.push(Diagnostic::new(line_number, &kind)),
        }
    }

    // Pass 1: assign addresses and collect labels.
    let mut symbols: BTreeMap<String, i64> = BTreeMap::new();
    let mut equs: Vec<(&AsmLine, &syntax::Expression)> = Vec::new();
    let mut address = 0u32;
    for line in &lines {
        let emits = matches!(
            line.item,
            Some(LineItem::Instr(..) | LineItem::Word(_) | LineItem::Adr { .. })
        );

        if let Some(label) = &line.label {
            if matches!(line.item, Some(LineItem::Equ(_))) {
                // Resolved below, possibly against labels defined later.
            } else if symbols.insert(label.clone(), i64::from(address)).is_some() {
                diagnostics.push(Diagnostic::new(
                    line.line_number,
                    &AsmErrorKind::DuplicateSymbol(label.clone()),
                ));
            }
        }

        match &line.item {
            Some(LineItem::Equ(expr)) => {
                if line.label.is_some() {
                    equs.push((line, expr));
                } else {
                    diagnostics
                        .push(Diagnostic::new(line.line_number, &AsmErrorKind::EquWithoutLabel));
                }
            }
            _ => {}
        }

        if emits {
            address = address.wrapping_add(4);
        }
    }

    // Resolve `equ` definitions; they may chain, so iterate until settled.
    for _ in 0..=equs.len() {
        let mut progressed = false;
        for (line, expr) in &equs {
            let label = line.label.as_ref().unwrap();
            if symbols.contains_key(label) {
                continue;
            }
            if let Ok(value) = expr.evaluate(&symbols) {
                symbols.insert(label.clone(), value);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    for (line, expr) in &equs {
        let label = line.label.as_ref().unwrap();
        if !symbols.contains_key(label) {
            if let Err(kind) = expr.evaluate(&symbols) {
                diagnostics.push(Diagnostic::new(line.line_number, &kind));
            }
        }
    }

    // Pass 2: encode against the full symbol table.
    let mut image = Vec::new();
    let mut line_map = BTreeMap::new();
    let mut address = 0u32;
    for line in &lines {
        let word = match &line.item {
            Some(LineItem::Instr(cond, instr)) => {
                match encode::encode_instr(*cond, instr, address, &symbols) {
                    Ok(word) => Some(word),
                    Err(kind) => {
                        diagnostics.push(Diagnostic::new(line.line_number, &kind));
                        Some(0)
                    }
                }
            }
            Some(LineItem::Adr { cond, rd, target }) => {
                match encode::encode_adr(*cond, *rd, target, address, &symbols) {
                    Ok(word) => Some(word),
                    Err(kind) => {
                        diagnostics.push(Diagnostic::new(line.line_number, &kind));
                        Some(0)
                    }
                }
            }
            Some(LineItem::Word(expr)) => match expr.evaluate(&symbols) {
                Ok(value) => Some(value as u32),
                Err(kind) => {
                    diagnostics.push(Diagnostic::new(line.line_number, &kind));
                    Some(0)
                }
            },
            Some(LineItem::Equ(_)) | None => None,
        };

        if let Some(word) = word {
            image.push(word);
            line_map.insert(
                address,
                SourceLine {
                    line_number: line.line_number,
                    address,
                    text: line.text.clone(),
                    comment: line.comment.clone(),
                },
            );
            address = address.wrapping_add(4);
        }
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    Ok(Program {
        symbols,
        image,
        lines: line_map,
        expectations: parse_expectations(src),
    })
}

/// Extracts `;!` expectation comments: `halts N`, `output <text>`, `rN V`.
fn parse_expectations(src: &str) -> Expectations {
    let mut expectations = Expectations::default();

    for line in src.lines() {
        let Some(directive) = line.trim_start().strip_prefix(";!") else {
            continue;
        };
        let directive = directive.trim_start();
        let Some((keyword, params)) = directive.split_once(' ') else {
            continue;
        };
        let keyword = keyword.to_lowercase();
        let params = params.trim();

        if keyword == "halts" {
            expectations.halts = params.parse().ok();
        } else if keyword == "output" {
            expectations.output = Some(params.to_owned());
        } else if let Some(index) = keyword
            .strip_prefix('r')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n <= 15)
        {
            expectations.registers.push((index, params.to_owned()));
        }
    }

    expectations
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn assembles_a_small_program() {
        let program = assemble(
            "\
start   mov r0, #1      ; one
        add r0, r0, #2
loop    b loop          ; spin
        dw 0xDEADBEEF
",
        )
        .unwrap();

        assert_eq!(program.image.len(), 4);
        assert_eq!(program.symbol("start"), Some(0));
        assert_eq!(program.symbol("LOOP"), Some(8));
        assert_eq!(program.image[2], 0xEAFF_FFFE); // b .
        assert_eq!(program.image[3], 0xDEAD_BEEF);

        let line = program.line_at(8).unwrap();
        assert_eq!(line.line_number, 3);
        assert_eq!(line.comment.as_deref(), Some(" spin"));
        assert_eq!(program.address_of_line(2), Some(4));
        assert_eq!(program.address_of_line(99), None);
    }

    #[test]
    fn forward_references_resolve() {
        let program = assemble(
            "\
        b end
        mov r0, #0
end     swi 2
",
        )
        .unwrap();
        // b end: target 8, from 0 -> offset 0.
        assert_eq!(program.image[0], 0xEA00_0000);
    }

    #[test]
    fn equ_defines_symbols() {
        let program = assemble(
            "\
answer  equ 6 * 7
half    equ answer / 2
        mov r0, #answer
        mov r1, #half
",
        )
        .unwrap();
        assert_eq!(program.symbol("answer"), Some(42));
        assert_eq!(program.symbol("half"), Some(21));
        assert_eq!(program.image[0], 0xE3A0_002A);
    }

    #[test]
    fn adr_uses_pc_relative_add() {
        let program = assemble(
            "\
        adr r0, data
        swi 2
data    dw 123
",
        )
        .unwrap();
        // data = 8, adr at 0 -> ADD R0, R15, #0.
        assert_eq!(program.image[0], 0xE28F_0000);
    }

    #[test]
    fn errors_accumulate_across_lines() {
        let err = assemble(
            "\
        mov r0, #0x101
        frobnicate r1
        b 3
",
        )
        .unwrap_err();
        assert_eq!(err.len(), 3);
        assert_eq!(err[0].line_number, 1);
        assert!(err[0].error.contains("rotated"));
        // A bare unknown identifier parses as a label; the operands behind
        // it are the actual error.
        assert_eq!(err[1].line_number, 2);
        assert_eq!(err[2].line_number, 3);
    }

    #[test]
    fn unknown_label_is_reported() {
        let err = assemble("        b nowhere\n").unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].error.contains("NOWHERE"));
    }

    #[test]
    fn duplicate_labels_are_reported() {
        let err = assemble("x mov r0, #0\nx mov r0, #1\n").unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].error.contains("duplicate"));
    }

    #[test]
    fn expectations_are_parsed() {
        let program = assemble(
            "\
;! halts 2
;! output 37/6=6r1
;! r4 6
        swi 2
",
        )
        .unwrap();
        assert_eq!(program.expectations.halts, Some(2));
        assert_eq!(program.expectations.output.as_deref(), Some("37/6=6r1"));
        assert_eq!(program.expectations.registers, vec![(4, "6".to_owned())]);
    }

    #[test]
    fn case_is_insensitive() {
        let program = assemble("START MOV R0, #1\n        B start\n").unwrap();
        assert_eq!(program.symbol("Start"), Some(0));
        assert_eq!(program.image[1], 0xEAFF_FFFD);
    }
}
