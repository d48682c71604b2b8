//! A line-oriented parser for ARM assembly.
//!
//! A line is `[label[:]] [instruction | directive] [; comment]`. Mnemonics
//! are matched through prefix/suffix tables so that every condition suffix
//! combines with every `S`/size suffix without enumerating the products
//! (`ADDEQS` = `ADD` + `EQ` + `S`). An identifier that matches no mnemonic
//! is a label.

use crate::cpu::arm::alu_instruction::{ArmModeAluInstruction, ShiftKind};
use crate::cpu::arm::instructions::{ArmModeMultiplyLongVariant, ArmModeMultiplyVariant, PsrKind};
use crate::cpu::condition::Condition;
use crate::cpu::flags::HalfwordTransferKind;

use super::lexer::{tokenize, Token};
use super::syntax::{
    AddressOperand, AsmInstr, AsmLine, AsmShift, BinaryOp, Expression, LineItem, MsrOperand,
    Operand2, ShiftAmount, SpecialOffset, TransferOffset, UnaryOp,
};
use super::AsmErrorKind;

/// Parses one source line.
pub fn parse_line(line_number: usize, text: &str) -> Result<AsmLine, AsmErrorKind> {
    let mut tokens = Vec::new();
    for token in tokenize(text) {
        tokens.push(token.map_err(|()| AsmErrorKind::Syntax(text.trim().to_owned()))?);
    }

    let comment = match tokens.last() {
        Some(Token::Comment(comment)) => {
            let comment = comment.clone();
            tokens.pop();
            Some(comment)
        }
        _ => None,
    };

    let mut parser = LineParser { tokens, pos: 0 };

    let mut label = None;
    let mut item = None;

    if !parser.done() {
        let first = parser.expect_ident()?;

        match parse_item(&mut parser, &first)? {
            Some(parsed) => item = Some(parsed),
            None => {
                // Not a mnemonic: this is a label.
                label = Some(first.to_uppercase());
                parser.eat(&Token::Colon);

                if !parser.done() {
                    let second = parser.expect_ident()?;
                    if second.eq_ignore_ascii_case("equ") {
                        item = Some(LineItem::Equ(parse_expression(&mut parser)?));
                    } else {
                        item = parse_item(&mut parser, &second)?
                            .map(Some)
                            .ok_or(AsmErrorKind::UnknownMnemonic(second))?;
                    }
                }
            }
        }
    }

    if !parser.done() {
        return Err(AsmErrorKind::TrailingTokens(text.trim().to_owned()));
    }

    Ok(AsmLine {
        line_number,
        label,
        item,
        comment,
        text: text.to_owned(),
    })
}

struct LineParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl LineParser {
    fn done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the next token if it equals `token`.
    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), AsmErrorKind> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(AsmErrorKind::Expected(format!("{token:?}")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, AsmErrorKind> {
        match self.next() {
            Some(Token::Ident(ident)) => Ok(ident),
            other => Err(AsmErrorKind::Expected(format!(
                "identifier, found {other:?}"
            ))),
        }
    }

    fn expect_comma(&mut self) -> Result<(), AsmErrorKind> {
        if self.eat(&Token::Comma) {
            Ok(())
        } else {
            Err(AsmErrorKind::ExpectedComma)
        }
    }

    /// Consumes a register name, if the next token is one.
    fn register(&mut self) -> Option<u32> {
        if let Some(Token::Ident(ident)) = self.peek() {
            if let Some(reg) = register_index(ident) {
                self.pos += 1;
                return Some(reg);
            }
        }
        None
    }

    fn expect_register(&mut self) -> Result<u32, AsmErrorKind> {
        self.register().ok_or(AsmErrorKind::ExpectedRegister)
    }
}

fn register_index(ident: &str) -> Option<u32> {
    let upper = ident.to_uppercase();
    match upper.as_str() {
        "SP" => Some(13),
        "LR" => Some(14),
        "PC" => Some(15),
        _ => {
            let number = upper.strip_prefix('R')?;
            let index: u32 = number.parse().ok()?;
            (index <= 15).then_some(index)
        }
    }
}

/// Splits `mnemonic` as `prefix + condition + suffix` against the given
/// tables. Prefixes are tried in order, so longer alternatives ("BL" before
/// "B") must come first.
fn match_mnemonic<'a, T, U>(
    prefixes: &'a [(&str, T)],
    suffixes: &'a [(&str, U)],
    mnemonic: &str,
) -> Option<(Condition, &'a T, &'a U)> {
    let upper = mnemonic.to_uppercase();
    for (prefix, t) in prefixes {
        if let Some(rest) = upper.strip_prefix(prefix) {
            for (suffix, u) in suffixes {
                if let Some(middle) = rest.strip_suffix(suffix) {
                    if let Ok(cond) = middle.parse::<Condition>() {
                        return Some((cond, t, u));
                    }
                }
            }
        }
    }
    None
}

fn match_simple(prefix: &str, mnemonic: &str) -> Option<Condition> {
    match_mnemonic(&[(prefix, ())], &[("", ())], mnemonic).map(|(cond, (), ())| cond)
}

/// Tries to parse `mnemonic` plus its operands as an instruction or
/// directive. Returns `Ok(None)` when the identifier is no mnemonic at all
/// (the caller then treats it as a label).
#[allow(clippy::too_many_lines)]
fn parse_item(p: &mut LineParser, mnemonic: &str) -> Result<Option<LineItem>, AsmErrorKind> {
    use ArmModeAluInstruction::*;

    let upper = mnemonic.to_uppercase();

    // Directives first: they carry no condition.
    if upper == "DW" {
        return Ok(Some(LineItem::Word(parse_expression(p)?)));
    }

    if let Some(cond) = match_simple("ADR", mnemonic) {
        let rd = p.expect_register()?;
        p.expect_comma()?;
        let target = parse_expression(p)?;
        return Ok(Some(LineItem::Adr { cond, rd, target }));
    }

    if let Some(cond) = match_simple("NOP", mnemonic) {
        // Assembles as MOV R0, R0.
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::DataProcessing {
                op: Mov,
                set_conditions: false,
                dest: 0,
                op1: 0,
                op2: Operand2::Register(
                    0,
                    AsmShift {
                        kind: ShiftKind::Lsl,
                        amount: ShiftAmount::Constant(Expression::Number(0)),
                    },
                ),
            },
        )));
    }

    if let Some(cond) = match_simple("BX", mnemonic) {
        let rm = p.expect_register()?;
        return Ok(Some(LineItem::Instr(cond, AsmInstr::BranchExchange { rm })));
    }

    if let Some((cond, link, ())) =
        match_mnemonic(&[("BL", true), ("B", false)], &[("", ())], mnemonic)
    {
        let target = parse_expression(p)?;
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::Branch {
                link: *link,
                target,
            },
        )));
    }

    if let Some((cond, op, s)) = match_mnemonic(
        &[("MOV", Mov), ("MVN", Mvn)],
        &[("S", true), ("", false)],
        mnemonic,
    ) {
        let dest = p.expect_register()?;
        p.expect_comma()?;
        let op2 = parse_operand2(p)?;
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::DataProcessing {
                op: *op,
                set_conditions: *s,
                dest,
                op1: 0,
                op2,
            },
        )));
    }

    if let Some((cond, op, ())) = match_mnemonic(
        &[("CMP", Cmp), ("CMN", Cmn), ("TEQ", Teq), ("TST", Tst)],
        &[("", ())],
        mnemonic,
    ) {
        let op1 = p.expect_register()?;
        p.expect_comma()?;
        let op2 = parse_operand2(p)?;
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::DataProcessing {
                op: *op,
                set_conditions: true,
                dest: 0,
                op1,
                op2,
            },
        )));
    }

    if let Some((cond, op, s)) = match_mnemonic(
        &[
            ("AND", And),
            ("EOR", Eor),
            ("SUB", Sub),
            ("RSB", Rsb),
            ("ADD", Add),
            ("ADC", Adc),
            ("SBC", Sbc),
            ("RSC", Rsc),
            ("ORR", Orr),
            ("BIC", Bic),
        ],
        &[("S", true), ("", false)],
        mnemonic,
    ) {
        let dest = p.expect_register()?;
        p.expect_comma()?;
        let op1 = p.expect_register()?;
        p.expect_comma()?;
        let op2 = parse_operand2(p)?;
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::DataProcessing {
                op: *op,
                set_conditions: *s,
                dest,
                op1,
                op2,
            },
        )));
    }

    if let Some((cond, variant, s)) = match_mnemonic(
        &[
            ("MUL", ArmModeMultiplyVariant::Mul),
            ("MLA", ArmModeMultiplyVariant::Mla),
        ],
        &[("S", true), ("", false)],
        mnemonic,
    ) {
        let rd = p.expect_register()?;
        p.expect_comma()?;
        let rm = p.expect_register()?;
        p.expect_comma()?;
        let rs = p.expect_register()?;
        let rn_accumulate = if *variant == ArmModeMultiplyVariant::Mla {
            p.expect_comma()?;
            p.expect_register()?
        } else {
            0
        };
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::Multiply {
                variant: *variant,
                set_conditions: *s,
                rd,
                rm,
                rs,
                rn_accumulate,
            },
        )));
    }

    if let Some((cond, variant, s)) = match_mnemonic(
        &[
            ("UMULL", ArmModeMultiplyLongVariant::Umull),
            ("UMLAL", ArmModeMultiplyLongVariant::Umlal),
            ("SMULL", ArmModeMultiplyLongVariant::Smull),
            ("SMLAL", ArmModeMultiplyLongVariant::Smlal),
        ],
        &[("S", true), ("", false)],
        mnemonic,
    ) {
        let rd_lo = p.expect_register()?;
        p.expect_comma()?;
        let rd_hi = p.expect_register()?;
        p.expect_comma()?;
        let rm = p.expect_register()?;
        p.expect_comma()?;
        let rs = p.expect_register()?;
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::MultiplyLong {
                variant: *variant,
                set_conditions: *s,
                rd_lo,
                rd_hi,
                rm,
                rs,
            },
        )));
    }

    #[derive(Clone, Copy, PartialEq)]
    enum TransferSuffix {
        Word,
        Byte,
        Half,
        SignedByte,
        SignedHalf,
    }

    if let Some((cond, load, suffix)) = match_mnemonic(
        &[("LDR", true), ("STR", false)],
        &[
            ("SB", TransferSuffix::SignedByte),
            ("SH", TransferSuffix::SignedHalf),
            ("B", TransferSuffix::Byte),
            ("H", TransferSuffix::Half),
            ("", TransferSuffix::Word),
        ],
        mnemonic,
    ) {
        let rd = p.expect_register()?;
        p.expect_comma()?;

        return match suffix {
            TransferSuffix::Word | TransferSuffix::Byte => {
                let (base, address) = parse_address(p, parse_transfer_offset)?;
                Ok(Some(LineItem::Instr(
                    cond,
                    AsmInstr::SingleTransfer {
                        load: *load,
                        byte: *suffix == TransferSuffix::Byte,
                        rd,
                        base,
                        address,
                    },
                )))
            }
            TransferSuffix::Half | TransferSuffix::SignedByte | TransferSuffix::SignedHalf => {
                let kind = match suffix {
                    TransferSuffix::Half => HalfwordTransferKind::UnsignedHalfword,
                    TransferSuffix::SignedByte => HalfwordTransferKind::SignedByte,
                    _ => HalfwordTransferKind::SignedHalfword,
                };
                if !*load && kind != HalfwordTransferKind::UnsignedHalfword {
                    return Err(AsmErrorKind::SignedStore);
                }
                let (base, address) = parse_address(p, parse_special_offset)?;
                Ok(Some(LineItem::Instr(
                    cond,
                    AsmInstr::HalfwordTransfer {
                        load: *load,
                        kind,
                        rd,
                        base,
                        address,
                    },
                )))
            }
        };
    }

    if let Some((cond, load, mode)) = match_mnemonic(
        &[("LDM", true), ("STM", false)],
        &[
            ("IA", "IA"),
            ("IB", "IB"),
            ("DA", "DA"),
            ("DB", "DB"),
            ("FA", "FA"),
            ("FD", "FD"),
            ("EA", "EA"),
            ("ED", "ED"),
        ],
        mnemonic,
    ) {
        let (pre_index, up) = block_addressing(*load, mode);
        let base = p.expect_register()?;
        let write_back = p.eat(&Token::Bang);
        p.expect_comma()?;
        let register_list = parse_register_list(p)?;
        let psr = p.eat(&Token::Caret);
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::BlockTransfer {
                load: *load,
                pre_index,
                up,
                write_back,
                psr,
                base,
                register_list,
            },
        )));
    }

    if let Some((cond, (), byte)) =
        match_mnemonic(&[("SWP", ())], &[("B", true), ("", false)], mnemonic)
    {
        let rd = p.expect_register()?;
        p.expect_comma()?;
        let rm = p.expect_register()?;
        p.expect_comma()?;
        p.expect(&Token::LBracket)?;
        let base = p.expect_register()?;
        p.expect(&Token::RBracket)?;
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::Swap {
                byte: *byte,
                rd,
                rm,
                base,
            },
        )));
    }

    if let Some(cond) = match_simple("MRS", mnemonic) {
        let rd = p.expect_register()?;
        p.expect_comma()?;
        let psr = match p.expect_ident()?.to_uppercase().as_str() {
            "CPSR" | "CPSR_ALL" => PsrKind::Cpsr,
            "SPSR" | "SPSR_ALL" => PsrKind::Spsr,
            _ => return Err(AsmErrorKind::InvalidPsr),
        };
        return Ok(Some(LineItem::Instr(cond, AsmInstr::Mrs { psr, rd })));
    }

    if let Some(cond) = match_simple("MSR", mnemonic) {
        let (psr, flags_only) = match p.expect_ident()?.to_uppercase().as_str() {
            "CPSR" | "CPSR_ALL" => (PsrKind::Cpsr, false),
            "SPSR" | "SPSR_ALL" => (PsrKind::Spsr, false),
            "CPSR_FLG" => (PsrKind::Cpsr, true),
            "SPSR_FLG" => (PsrKind::Spsr, true),
            _ => return Err(AsmErrorKind::InvalidPsr),
        };
        p.expect_comma()?;
        let source = match p.register() {
            Some(reg) => MsrOperand::Register(reg),
            None => {
                if !flags_only {
                    return Err(AsmErrorKind::ExpectedRegister);
                }
                MsrOperand::Constant(parse_expression(p)?)
            }
        };
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::Msr {
                psr,
                flags_only,
                source,
            },
        )));
    }

    if let Some(cond) = match_simple("SWI", mnemonic) {
        let comment = parse_expression(p)?;
        return Ok(Some(LineItem::Instr(
            cond,
            AsmInstr::SoftwareInterrupt { comment },
        )));
    }

    Ok(None)
}

/// Resolves a block-transfer addressing suffix to (pre-index, up) bits.
/// The stack aliases mean opposite things for loads and stores.
fn block_addressing(load: bool, mode: &str) -> (bool, bool) {
    match (mode, load) {
        ("IA", _) | ("FD", true) | ("EA", false) => (false, true),
        ("IB", _) | ("ED", true) | ("FA", false) => (true, true),
        ("DA", _) | ("FA", true) | ("ED", false) => (false, false),
        _ => (true, false), // DB, and FD-store / EA-load
    }
}

fn parse_operand2(p: &mut LineParser) -> Result<Operand2, AsmErrorKind> {
    match p.register() {
        Some(reg) => Ok(Operand2::Register(reg, parse_shift(p)?)),
        None => Ok(Operand2::Constant(parse_immediate(p)?)),
    }
}

/// Parses the optional `, <shift>` after a register operand. Without one,
/// the canonical `LSL #0` no-shift is returned.
fn parse_shift(p: &mut LineParser) -> Result<AsmShift, AsmErrorKind> {
    let checkpoint = p.pos;
    if !p.eat(&Token::Comma) {
        return Ok(AsmShift {
            kind: ShiftKind::Lsl,
            amount: ShiftAmount::Constant(Expression::Number(0)),
        });
    }

    let Some(Token::Ident(ident)) = p.peek() else {
        // The comma belongs to the caller (e.g. a following shift-less
        // operand list); rewind.
        p.pos = checkpoint;
        return Ok(AsmShift {
            kind: ShiftKind::Lsl,
            amount: ShiftAmount::Constant(Expression::Number(0)),
        });
    };

    let kind = match ident.to_uppercase().as_str() {
        "LSL" | "ASL" => ShiftKind::Lsl,
        "LSR" => ShiftKind::Lsr,
        "ASR" => ShiftKind::Asr,
        "ROR" => ShiftKind::Ror,
        "RRX" => {
            p.pos += 1;
            return Ok(AsmShift {
                kind: ShiftKind::Rrx,
                amount: ShiftAmount::Constant(Expression::Number(0)),
            });
        }
        _ => {
            p.pos = checkpoint;
            return Ok(AsmShift {
                kind: ShiftKind::Lsl,
                amount: ShiftAmount::Constant(Expression::Number(0)),
            });
        }
    };
    p.pos += 1;

    match p.register() {
        Some(reg) => Ok(AsmShift {
            kind,
            amount: ShiftAmount::Register(reg),
        }),
        None => Ok(AsmShift {
            kind,
            amount: ShiftAmount::Constant(parse_immediate(p)?),
        }),
    }
}

/// Parses a transfer address: `[Rn]`, `[Rn, <offset>]{!}` or `[Rn], <offset>`.
fn parse_address<O>(
    p: &mut LineParser,
    offset: impl Fn(&mut LineParser) -> Result<(bool, O), AsmErrorKind>,
) -> Result<(u32, AddressOperand<O>), AsmErrorKind>
where
    O: ZeroOffset,
{
    p.expect(&Token::LBracket)?;
    let base = p.expect_register()?;

    if p.eat(&Token::RBracket) {
        if p.eat(&Token::Comma) {
            // Post-indexed.
            let (positive, offset) = offset(p)?;
            Ok((
                base,
                AddressOperand {
                    pre_index: false,
                    write_back: false,
                    positive,
                    offset,
                },
            ))
        } else {
            let write_back = p.eat(&Token::Bang);
            Ok((
                base,
                AddressOperand {
                    pre_index: true,
                    write_back,
                    positive: true,
                    offset: O::zero(),
                },
            ))
        }
    } else {
        p.expect_comma()?;
        let (positive, offset) = offset(p)?;
        p.expect(&Token::RBracket)?;
        let write_back = p.eat(&Token::Bang);
        Ok((
            base,
            AddressOperand {
                pre_index: true,
                write_back,
                positive,
                offset,
            },
        ))
    }
}

/// A zero offset for the bare `[Rn]` form.
trait ZeroOffset {
    fn zero() -> Self;
}

impl ZeroOffset for TransferOffset {
    fn zero() -> Self {
        Self::Constant(Expression::Number(0))
    }
}

impl ZeroOffset for SpecialOffset {
    fn zero() -> Self {
        Self::Constant(Expression::Number(0))
    }
}

fn parse_transfer_offset(p: &mut LineParser) -> Result<(bool, TransferOffset), AsmErrorKind> {
    let negative = p.eat(&Token::Minus);
    if !negative {
        p.eat(&Token::Plus);
    }
    match p.register() {
        Some(reg) => Ok((!negative, TransferOffset::Register(reg, parse_shift(p)?))),
        None => {
            if negative {
                // A sign before an expression folds into the constant.
                let expr = parse_immediate(p)?;
                Ok((
                    true,
                    TransferOffset::Constant(Expression::Unary(UnaryOp::Negate, Box::new(expr))),
                ))
            } else {
                Ok((true, TransferOffset::Constant(parse_immediate(p)?)))
            }
        }
    }
}

fn parse_special_offset(p: &mut LineParser) -> Result<(bool, SpecialOffset), AsmErrorKind> {
    let negative = p.eat(&Token::Minus);
    if !negative {
        p.eat(&Token::Plus);
    }
    match p.register() {
        Some(reg) => Ok((!negative, SpecialOffset::Register(reg))),
        None => {
            let expr = parse_immediate(p)?;
            let expr = if negative {
                Expression::Unary(UnaryOp::Negate, Box::new(expr))
            } else {
                expr
            };
            Ok((true, SpecialOffset::Constant(expr)))
        }
    }
}

/// Parses `{R0, R2-R4, LR}` into a 16-bit register bitmap.
fn parse_register_list(p: &mut LineParser) -> Result<u16, AsmErrorKind> {
    p.expect(&Token::LBrace)?;
    let mut list: u16 = 0;

    if p.eat(&Token::RBrace) {
        return Ok(list);
    }

    loop {
        let first = p.expect_register()?;
        if p.eat(&Token::Minus) {
            let last = p.expect_register()?;
            if last < first {
                return Err(AsmErrorKind::InvalidRegisterRange);
            }
            for reg in first..=last {
                list |= 1 << reg;
            }
        } else {
            list |= 1 << first;
        }

        if p.eat(&Token::RBrace) {
            return Ok(list);
        }
        p.expect_comma()?;
    }
}

/// An immediate, with or without the `#` prefix.
fn parse_immediate(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    p.eat(&Token::Hash);
    parse_expression(p)
}

/// Expression grammar, loosest to tightest:
/// `or` < `xor` < `and` < `lsl lsr` < `+ -` < `* /` < unary `- not`.
fn parse_expression(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    p.eat(&Token::Hash);
    parse_or(p)
}

fn word_op(p: &mut LineParser, word: &str) -> bool {
    if let Some(Token::Ident(ident)) = p.peek() {
        if ident.eq_ignore_ascii_case(word) {
            p.pos += 1;
            return true;
        }
    }
    false
}

fn parse_or(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    let mut lhs = parse_xor(p)?;
    while word_op(p, "or") {
        let rhs = parse_xor(p)?;
        lhs = Expression::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_xor(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    let mut lhs = parse_and(p)?;
    while word_op(p, "xor") {
        let rhs = parse_and(p)?;
        lhs = Expression::Binary(BinaryOp::Xor, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_and(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    let mut lhs = parse_shift_expr(p)?;
    while word_op(p, "and") {
        let rhs = parse_shift_expr(p)?;
        lhs = Expression::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_shift_expr(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    let mut lhs = parse_additive(p)?;
    loop {
        let op = if word_op(p, "lsl") {
            BinaryOp::Lsl
        } else if word_op(p, "lsr") {
            BinaryOp::Lsr
        } else {
            return Ok(lhs);
        };
        let rhs = parse_additive(p)?;
        lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
    }
}

fn parse_additive(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    let mut lhs = parse_term(p)?;
    loop {
        let op = if p.eat(&Token::Plus) {
            BinaryOp::Add
        } else if p.eat(&Token::Minus) {
            BinaryOp::Sub
        } else {
            return Ok(lhs);
        };
        let rhs = parse_term(p)?;
        lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
    }
}

fn parse_term(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    let mut lhs = parse_unary(p)?;
    loop {
        let op = if p.eat(&Token::Star) {
            BinaryOp::Mul
        } else if p.eat(&Token::Slash) {
            BinaryOp::Div
        } else {
            return Ok(lhs);
        };
        let rhs = parse_unary(p)?;
        lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
    }
}

fn parse_unary(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    if p.eat(&Token::Minus) {
        return Ok(Expression::Unary(
            UnaryOp::Negate,
            Box::new(parse_unary(p)?),
        ));
    }
    if word_op(p, "not") {
        return Ok(Expression::Unary(UnaryOp::Not, Box::new(parse_unary(p)?)));
    }
    parse_atom(p)
}

fn parse_atom(p: &mut LineParser) -> Result<Expression, AsmErrorKind> {
    match p.next() {
        Some(Token::Number(value)) => Ok(Expression::Number(value)),
        Some(Token::Ident(ident)) => Ok(Expression::Symbol(ident.to_uppercase())),
        Some(Token::LParen) => {
            let inner = parse_or(p)?;
            p.expect(&Token::RParen)?;
            Ok(inner)
        }
        other => Err(AsmErrorKind::Expected(format!(
            "expression, found {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(line: &str) -> LineItem {
        parse_line(1, line).unwrap().item.unwrap()
    }

    #[test]
    fn parses_label_and_comment() {
        let line = parse_line(3, "loop: add r0, r0, #1 ; bump").unwrap();
        assert_eq!(line.label.as_deref(), Some("LOOP"));
        assert!(matches!(line.item, Some(LineItem::Instr(..))));
        assert_eq!(line.comment.as_deref(), Some(" bump"));
    }

    #[test]
    fn label_without_colon() {
        let line = parse_line(1, "start mov r0, #0").unwrap();
        assert_eq!(line.label.as_deref(), Some("START"));
        assert!(line.item.is_some());
    }

    #[test]
    fn bare_label_line() {
        let line = parse_line(1, "done").unwrap();
        assert_eq!(line.label.as_deref(), Some("DONE"));
        assert!(line.item.is_none());
    }

    #[test]
    fn condition_and_s_suffixes_combine() {
        match item("addeqs r1, r2, r3") {
            LineItem::Instr(cond, AsmInstr::DataProcessing {
                op,
                set_conditions,
                dest,
                op1,
                ..
            }) => {
                assert_eq!(cond, Condition::EQ);
                assert_eq!(op, ArmModeAluInstruction::Add);
                assert!(set_conditions);
                assert_eq!((dest, op1), (1, 2));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn blt_is_branch_with_lt() {
        match item("blt somewhere") {
            LineItem::Instr(cond, AsmInstr::Branch { link, .. }) => {
                assert_eq!(cond, Condition::LT);
                assert!(!link);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn bleq_is_branch_and_link() {
        match item("bleq somewhere") {
            LineItem::Instr(cond, AsmInstr::Branch { link, .. }) => {
                assert_eq!(cond, Condition::EQ);
                assert!(link);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn shifted_operand() {
        match item("mov r0, r1, lsl #2") {
            LineItem::Instr(_, AsmInstr::DataProcessing {
                op2: Operand2::Register(1, AsmShift { kind, amount }),
                ..
            }) => {
                assert_eq!(kind, ShiftKind::Lsl);
                assert!(matches!(amount, ShiftAmount::Constant(Expression::Number(2))));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn addressing_modes() {
        match item("ldr r0, [r1, #4]!") {
            LineItem::Instr(_, AsmInstr::SingleTransfer { address, .. }) => {
                assert!(address.pre_index);
                assert!(address.write_back);
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        match item("str r0, [r1], -r2") {
            LineItem::Instr(_, AsmInstr::SingleTransfer { address, .. }) => {
                assert!(!address.pre_index);
                assert!(!address.positive);
                assert!(matches!(address.offset, TransferOffset::Register(2, _)));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn register_list_with_ranges() {
        match item("stmfd sp!, {r0-r2, lr}") {
            LineItem::Instr(_, AsmInstr::BlockTransfer {
                register_list,
                write_back,
                pre_index,
                up,
                ..
            }) => {
                assert_eq!(register_list, 0b0100_0000_0000_0111);
                assert!(write_back);
                // FD for a store is DB.
                assert!(pre_index);
                assert!(!up);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn empty_register_list() {
        match item("stmia r0!, {}") {
            LineItem::Instr(_, AsmInstr::BlockTransfer { register_list, .. }) => {
                assert_eq!(register_list, 0);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn msr_forms() {
        assert!(matches!(
            item("msr cpsr_flg, #0xF0000000"),
            LineItem::Instr(_, AsmInstr::Msr {
                psr: PsrKind::Cpsr,
                flags_only: true,
                source: MsrOperand::Constant(_),
            })
        ));
        assert!(matches!(
            item("msr spsr, r0"),
            LineItem::Instr(_, AsmInstr::Msr {
                psr: PsrKind::Spsr,
                flags_only: false,
                source: MsrOperand::Register(0),
            })
        ));
    }

    #[test]
    fn equ_and_dw() {
        let line = parse_line(1, "size equ 4 * 8").unwrap();
        assert_eq!(line.label.as_deref(), Some("SIZE"));
        assert!(matches!(line.item, Some(LineItem::Equ(_))));

        assert!(matches!(item("dw 0xDEADBEEF"), LineItem::Word(_)));
    }

    #[test]
    fn expression_precedence() {
        // 1 + 2 * 3 lsl 1 = (1 + (2*3)) << 1 = 14
        let LineItem::Word(expr) = item("dw 1 + 2 * 3 lsl 1") else {
            panic!("expected dw");
        };
        assert_eq!(expr.evaluate(&Default::default()), Ok(14));
    }

    #[test]
    fn character_literal_operand() {
        let LineItem::Instr(_, AsmInstr::DataProcessing {
            op2: Operand2::Constant(expr),
            ..
        }) = item("mov r0, #'A'")
        else {
            panic!("expected mov");
        };
        assert_eq!(expr.evaluate(&Default::default()), Ok(65));
    }

    #[test]
    fn unknown_mnemonic_after_label_errors() {
        assert!(parse_line(1, "label frobnicate r0").is_err());
    }

    #[test]
    fn swi_operand() {
        assert!(matches!(
            item("swi 2"),
            LineItem::Instr(Condition::AL, AsmInstr::SoftwareInterrupt { .. })
        ));
    }
}
