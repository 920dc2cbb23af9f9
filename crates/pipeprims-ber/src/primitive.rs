//! Primitive universal types: NULL, OCTET STRING, BIT STRING, unsigned
//! INTEGER and the text strings.

use std::ops::RangeInclusive;

use bytes::Bytes;
use pipeprims_stage::{Readable, Writable};

use crate::decoder::Decoder;
use crate::encoder::encode_primitive;
use crate::error::{BerError, Result};
use crate::tag::Tag;

pub fn encode_null<W: Writable + ?Sized>(dst: &mut W) -> Result<()> {
    encode_primitive(dst, Tag::NULL, &[])
}

pub fn decode_null<R: Readable + ?Sized>(src: &mut R) -> Result<()> {
    Decoder::scope(src, Tag::NULL, |null| {
        if null.remaining() != Some(0) {
            return Err(BerError::InvalidValue("NULL with content"));
        }
        Ok(())
    })
}

pub fn encode_octet_string<W: Writable + ?Sized>(dst: &mut W, data: &[u8]) -> Result<()> {
    encode_primitive(dst, Tag::OCTET_STRING, data)
}

pub fn decode_octet_string<R: Readable + ?Sized>(src: &mut R) -> Result<Bytes> {
    Decoder::scope(src, Tag::OCTET_STRING, |octets| octets.read_remaining())
}

/// A BIT STRING value: content octets plus the number of unused trailing
/// bits in the last octet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitString {
    pub unused_bits: u8,
    pub data: Bytes,
}

impl BitString {
    /// A bit string made of whole octets.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            unused_bits: 0,
            data: data.into(),
        }
    }

    /// Significant bits. Zero for an empty string, whatever `unused_bits` says.
    pub fn bit_len(&self) -> usize {
        (self.data.len() * 8).saturating_sub(usize::from(self.unused_bits))
    }

    fn validate(unused_bits: u8, data: &[u8]) -> Result<()> {
        if unused_bits > 7 {
            return Err(BerError::InvalidValue("BIT STRING unused bits above 7"));
        }
        if data.is_empty() && unused_bits != 0 {
            return Err(BerError::InvalidValue("empty BIT STRING with unused bits"));
        }
        Ok(())
    }
}

pub fn encode_bit_string<W: Writable + ?Sized>(dst: &mut W, bits: &BitString) -> Result<()> {
    BitString::validate(bits.unused_bits, &bits.data)?;
    crate::encoder::encode_header(dst, Tag::BIT_STRING, 1 + bits.data.len())?;
    dst.put_byte(bits.unused_bits)?;
    dst.put(&bits.data)?;
    Ok(())
}

pub fn decode_bit_string<R: Readable + ?Sized>(src: &mut R) -> Result<BitString> {
    Decoder::scope(src, Tag::BIT_STRING, |bits| {
        let unused_bits = bits.read_byte()?;
        let data = bits.read_remaining()?;
        BitString::validate(unused_bits, &data)?;
        Ok(BitString { unused_bits, data })
    })
}

/// Minimal two's-complement content octets of a non-negative integer.
fn unsigned_octets(value: u64) -> ([u8; 9], usize) {
    let mut out = [0u8; 9];
    let be = value.to_be_bytes();
    let skip = ((value.leading_zeros() / 8) as usize).min(be.len() - 1);
    let digits = &be[skip..];
    let pad = usize::from(digits[0] & 0x80 != 0);
    out[pad..pad + digits.len()].copy_from_slice(digits);
    (out, pad + digits.len())
}

/// Write a non-negative INTEGER (or ENUMERATED, with `tag`).
pub fn encode_unsigned<W: Writable + ?Sized>(dst: &mut W, value: u64, tag: Tag) -> Result<()> {
    let (octets, len) = unsigned_octets(value);
    encode_primitive(dst, tag, &octets[..len])
}

/// Read a non-negative INTEGER that must fall within `range`.
pub fn decode_unsigned<R: Readable + ?Sized>(
    src: &mut R,
    tag: Tag,
    range: RangeInclusive<u64>,
) -> Result<u64> {
    let value = Decoder::scope(src, tag, |int| {
        let content = int.read_remaining()?;
        let (&first, _) = content
            .split_first()
            .ok_or(BerError::InvalidValue("empty INTEGER"))?;
        if first & 0x80 != 0 {
            return Err(BerError::InvalidValue("negative INTEGER"));
        }
        let digits = match content.iter().position(|&b| b != 0) {
            Some(start) => &content[start..],
            None => &[][..],
        };
        if digits.len() > 8 {
            return Err(BerError::InvalidValue("INTEGER too large"));
        }
        Ok(digits
            .iter()
            .fold(0u64, |acc, &b| acc << 8 | u64::from(b)))
    })?;
    if !range.contains(&value) {
        return Err(BerError::InvalidValue("INTEGER out of range"));
    }
    Ok(value)
}

/// Write a string type such as UTF8String, PrintableString or IA5String.
pub fn encode_text_string<W: Writable + ?Sized>(dst: &mut W, text: &str, tag: Tag) -> Result<()> {
    encode_primitive(dst, tag, text.as_bytes())
}

pub fn decode_text_string<R: Readable + ?Sized>(src: &mut R, tag: Tag) -> Result<String> {
    let content = Decoder::scope(src, tag, |text| text.read_remaining())?;
    String::from_utf8(content.to_vec()).map_err(|_| BerError::InvalidValue("string is not UTF-8"))
}
