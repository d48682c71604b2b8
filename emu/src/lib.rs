//! # Satsuma emulation core
//!
//! An ARM7TDMI instruction-set emulator with an integrated assembler and a
//! batch-stepping debugger surface. No UI code lives here; a host drives
//! the [`controller::Controller`] command surface and renders the snapshots
//! it returns.
//!
//! ## Module overview
//!
//! | Module         | Description                                          |
//! |----------------|------------------------------------------------------|
//! | [`asm`]        | Assembler: lexer, parser, encoder, diagnostics       |
//! | [`cpu`]        | The processor: decode, execute, registers, PSRs      |
//! | [`memory`]     | Sparse 32-bit little-endian address space            |
//! | [`program`]    | Assembled image, symbol table, source-line map       |
//! | [`controller`] | Host command surface over one locked processor       |
//! | [`harness`]    | Runs `;!`-annotated programs and checks expectations |
//!
//! ## Quick start
//!
//! ```
//! use emu::controller::Controller;
//!
//! let controller = Controller::new();
//! controller
//!     .load_program(None, "mov r0, #'!'\nswi 0\nswi 2\n")
//!     .unwrap();
//! controller.step_times(100);
//! assert_eq!(controller.processor_info().output, "!");
//! ```

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
mod bitwise;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod asm;
pub mod controller;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod cpu;
pub mod harness;
pub mod memory;
pub mod program;
