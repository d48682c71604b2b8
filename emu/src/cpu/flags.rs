//! Small enums shared by the decoder and executor, each mapping a single
//! instruction bit to its meaning.

/// Word or byte quantity for single data transfers and swaps.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum ReadWriteKind {
    /// A 32-bit word.
    #[default]
    Word,

    /// An 8-bit byte.
    Byte,
}

impl From<bool> for ReadWriteKind {
    fn from(value: bool) -> Self {
        if value {
            Self::Byte
        } else {
            Self::Word
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LoadStoreKind {
    Store,
    Load,
}

impl From<bool> for LoadStoreKind {
    fn from(b: bool) -> Self {
        match b {
            false => Self::Store,
            true => Self::Load,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Indexing {
    /// Add offset after transfer.
    Post,

    /// Add offset before transfer.
    Pre,
}

impl From<bool> for Indexing {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Post,
            true => Self::Pre,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Offsetting {
    /// Subtract the offset from base.
    Down,

    /// Add the offset to base.
    Up,
}

impl From<bool> for Offsetting {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Down,
            true => Self::Up,
        }
    }
}

/// Halfword and signed transfers encode their flavour in the S/H bits.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HalfwordTransferKind {
    /// S=0 H=1: unsigned halfword.
    UnsignedHalfword,

    /// S=1 H=0: sign-extended byte (loads only).
    SignedByte,

    /// S=1 H=1: sign-extended halfword (loads only).
    SignedHalfword,
}

impl From<u8> for HalfwordTransferKind {
    fn from(sh: u8) -> Self {
        match sh & 0b11 {
            0b01 => Self::UnsignedHalfword,
            0b10 => Self::SignedByte,
            0b11 => Self::SignedHalfword,
            _ => unreachable!("SH = 00 decodes as multiply/swap, not a halfword transfer"),
        }
    }
}

impl std::fmt::Display for HalfwordTransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsignedHalfword => f.write_str("H"),
            Self::SignedByte => f.write_str("SB"),
            Self::SignedHalfword => f.write_str("SH"),
        }
    }
}
