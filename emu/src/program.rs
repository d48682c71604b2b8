//! The output of a successful assembly: the initial memory image, the symbol
//! table, the source-line map and the declared test expectations.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::asm::syntax::Expectations;

/// Source metadata for one emitted word.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based line number in the source file.
    pub line_number: usize,

    /// Address of the word this line emitted.
    pub address: u32,

    /// The source text, verbatim.
    pub text: String,

    /// The line comment, `;` stripped.
    pub comment: Option<String>,
}

/// An assembled program.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Program {
    /// Label and `equ` values, keyed by uppercased name.
    pub symbols: BTreeMap<String, i64>,

    /// The initial memory image, loaded at address 0.
    pub image: Vec<u32>,

    /// Map from emitted address to source metadata.
    pub lines: BTreeMap<u32, SourceLine>,

    /// Expected results declared in `;!` comments.
    #[serde(skip)]
    pub expectations: Expectations,
}

impl Program {
    /// The address a label refers to, if it is defined.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<i64> {
        self.symbols.get(&name.to_uppercase()).copied()
    }

    /// Source metadata for the word at `addr`, if any line emitted it.
    #[must_use]
    pub fn line_at(&self, addr: u32) -> Option<&SourceLine> {
        self.lines.get(&(addr & !0b11))
    }

    /// The address range of the line numbered `line_number`, if it emitted
    /// anything.
    #[must_use]
    pub fn address_of_line(&self, line_number: usize) -> Option<u32> {
        self.lines
            .values()
            .find(|line| line.line_number == line_number)
            .map(|line| line.address)
    }
}
