//! Tokenizing ARM assembly source.
//!
//! Lexing is line-oriented: the parser feeds one source line at a time, so
//! tokens never span lines and the comment token always closes the line.

use logos::{Lexer, Logos};

/// One token of an assembly line.
///
/// Mnemonics, register names and operator words (`lsl`, `or`, `not`, ...)
/// all arrive as [`Token::Ident`]; the parser decides which is which, since
/// a bare identifier may equally be a label.
#[derive(Debug, Clone, PartialEq, Eq, Logos)]
#[logos(skip r"[ \t\r]+")]
pub enum Token {
    /// A numeric literal: decimal, `0x`/`&` hex, `0b` binary or a character
    /// literal like `'A'`.
    #[regex(r"[0-9]+", |lx| lx.slice().parse::<i64>().ok())]
    #[regex(r"0[xX][0-9A-Fa-f]+", lex_hex)]
    #[regex(r"&[0-9A-Fa-f]+", lex_amp_hex)]
    #[regex(r"0[bB][01]+", lex_bin)]
    #[regex(r"'(\\.|[^'\\])'", lex_char)]
    Number(i64),

    /// A label, mnemonic, register name or operator word.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lx| lx.slice().to_owned())]
    Ident(String),

    /// A comment spanning the rest of the line, `;` excluded.
    #[regex(r";[^\n]*", |lx| lx.slice()[1..].to_owned())]
    Comment(String),

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token("#")]
    Hash,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("!")]
    Bang,

    #[token("^")]
    Caret,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("=")]
    Equal,
}

fn lex_hex(lx: &mut Lexer<Token>) -> Option<i64> {
    i64::from_str_radix(&lx.slice()[2..], 16).ok()
}

fn lex_amp_hex(lx: &mut Lexer<Token>) -> Option<i64> {
    i64::from_str_radix(&lx.slice()[1..], 16).ok()
}

fn lex_bin(lx: &mut Lexer<Token>) -> Option<i64> {
    i64::from_str_radix(&lx.slice()[2..], 2).ok()
}

fn lex_char(lx: &mut Lexer<Token>) -> Option<i64> {
    let inner = &lx.slice()[1..lx.slice().len() - 1];
    let c = if let Some(escaped) = inner.strip_prefix('\\') {
        match escaped {
            "n" => '\n',
            "t" => '\t',
            "r" => '\r',
            "0" => '\0',
            "\\" => '\\',
            "'" => '\'',
            other => other.chars().next()?,
        }
    } else {
        inner.chars().next()?
    };
    Some(c as i64)
}

/// Lexes one line into tokens. Characters no rule accepts surface as
/// `Err(())` items and become syntax errors in the parser.
pub fn tokenize(line: &str) -> Vec<Result<Token, ()>> {
    Token::lexer(line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_tokens(line: &str) -> Vec<Token> {
        tokenize(line).into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn lexes_numbers_in_every_radix() {
        assert_eq!(
            ok_tokens("10 0x1F &1f 0b101 'A' '\\n'"),
            vec![
                Token::Number(10),
                Token::Number(0x1F),
                Token::Number(0x1F),
                Token::Number(0b101),
                Token::Number(65),
                Token::Number(10),
            ]
        );
    }

    #[test]
    fn lexes_an_instruction_line() {
        assert_eq!(
            ok_tokens("loop add r1, r2, #4 ; increment"),
            vec![
                Token::Ident("loop".to_owned()),
                Token::Ident("add".to_owned()),
                Token::Ident("r1".to_owned()),
                Token::Comma,
                Token::Ident("r2".to_owned()),
                Token::Comma,
                Token::Hash,
                Token::Number(4),
                Token::Comment(" increment".to_owned()),
            ]
        );
    }

    #[test]
    fn lexes_addressing_punctuation() {
        assert_eq!(
            ok_tokens("ldr r0, [r1, -r2]!"),
            vec![
                Token::Ident("ldr".to_owned()),
                Token::Ident("r0".to_owned()),
                Token::Comma,
                Token::LBracket,
                Token::Ident("r1".to_owned()),
                Token::Comma,
                Token::Minus,
                Token::Ident("r2".to_owned()),
                Token::RBracket,
                Token::Bang,
            ]
        );
    }

    #[test]
    fn comment_runs_to_end_of_line() {
        assert_eq!(
            ok_tokens("; just a comment, with, commas"),
            vec![Token::Comment(" just a comment, with, commas".to_owned())]
        );
    }

    #[test]
    fn unknown_characters_error() {
        assert!(tokenize("mov r0, @").iter().any(Result::is_err));
    }
}
