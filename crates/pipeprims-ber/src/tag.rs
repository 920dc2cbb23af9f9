use std::fmt;

use crate::error::{BerError, Result};

/// ASN.1 tag class, taken from the top two bits of the identifier octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

/// A single-octet identifier: class, constructed flag and tag number.
///
/// Only tag numbers below 31 are representable. The identifier octets of the
/// high tag number form are rejected with [`BerError::HighTagNumber`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u8);

impl Tag {
    pub const END_OF_CONTENTS: Tag = Tag(0x00);
    pub const BOOLEAN: Tag = Tag(0x01);
    pub const INTEGER: Tag = Tag(0x02);
    pub const BIT_STRING: Tag = Tag(0x03);
    pub const OCTET_STRING: Tag = Tag(0x04);
    pub const NULL: Tag = Tag(0x05);
    pub const OBJECT_IDENTIFIER: Tag = Tag(0x06);
    pub const UTF8_STRING: Tag = Tag(0x0C);
    pub const PRINTABLE_STRING: Tag = Tag(0x13);
    pub const IA5_STRING: Tag = Tag(0x16);
    pub const SEQUENCE: Tag = Tag(0x30);
    pub const SET: Tag = Tag(0x31);

    const CONSTRUCTED: u8 = 0b0010_0000;
    const NUMBER_MASK: u8 = 0b0001_1111;

    /// Interpret an identifier octet.
    pub fn from_octet(octet: u8) -> Result<Self> {
        if octet & Self::NUMBER_MASK == Self::NUMBER_MASK {
            return Err(BerError::HighTagNumber);
        }
        Ok(Self(octet))
    }

    /// A context-specific tag such as `[0]`.
    pub const fn context(number: u8, constructed: bool) -> Self {
        let pc = if constructed { Self::CONSTRUCTED } else { 0 };
        Self(0b1000_0000 | pc | (number & Self::NUMBER_MASK))
    }

    pub const fn octet(self) -> u8 {
        self.0
    }

    pub const fn number(self) -> u8 {
        self.0 & Self::NUMBER_MASK
    }

    pub const fn is_constructed(self) -> bool {
        self.0 & Self::CONSTRUCTED != 0
    }

    pub fn class(self) -> Class {
        match self.0 >> 6 {
            0b00 => Class::Universal,
            0b01 => Class::Application,
            0b10 => Class::Context,
            _ => Class::Private,
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:#04x})", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}
