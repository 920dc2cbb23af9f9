use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use pipeprims_stage::{Readable, Writable};

use crate::decoder::Decoder;
use crate::encoder::encode_primitive;
use crate::error::{BerError, Result};
use crate::tag::Tag;

/// An OBJECT IDENTIFIER as its list of arcs.
///
/// The first arc is 0, 1 or 2; under 0 and 1 the second arc is below 40.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: impl Into<Vec<u32>>) -> Result<Self> {
        let arcs = arcs.into();
        match arcs.as_slice() {
            [first, second, ..] if *first < 2 && *second < 40 => Ok(Self(arcs)),
            [2, _, ..] => Ok(Self(arcs)),
            _ => Err(BerError::InvalidValue("object identifier arcs")),
        }
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// The content octets: base-128 subidentifiers, the first one combining
    /// the first two arcs.
    pub fn to_content(&self) -> BytesMut {
        let mut out = BytesMut::new();
        let first = u64::from(self.0[0]) * 40 + u64::from(self.0[1]);
        put_subidentifier(&mut out, first);
        for &arc in &self.0[2..] {
            put_subidentifier(&mut out, u64::from(arc));
        }
        out
    }

    /// Parse content octets.
    pub fn from_content(content: &[u8]) -> Result<Self> {
        if content.is_empty() {
            return Err(BerError::InvalidValue("empty object identifier"));
        }
        let mut arcs = Vec::new();
        let mut rest = content;
        while !rest.is_empty() {
            let (value, used) = take_subidentifier(rest)?;
            rest = &rest[used..];
            if arcs.is_empty() {
                let top = (value / 40).min(2);
                arcs.push(top as u32);
                arcs.push(arc(value - top * 40)?);
            } else {
                arcs.push(arc(value)?);
            }
        }
        Ok(Self(arcs))
    }

    pub fn encode<W: Writable + ?Sized>(&self, dst: &mut W) -> Result<()> {
        encode_primitive(dst, Tag::OBJECT_IDENTIFIER, &self.to_content())
    }

    pub fn decode<R: Readable + ?Sized>(src: &mut R) -> Result<Self> {
        Decoder::scope(src, Tag::OBJECT_IDENTIFIER, |oid| {
            Self::from_content(&oid.read_remaining()?)
        })
    }

    /// Decode an identifier that must equal `expected`.
    pub fn decode_and_check<R: Readable + ?Sized>(src: &mut R, expected: &Oid) -> Result<()> {
        if Self::decode(src)? != *expected {
            return Err(BerError::InvalidValue("unexpected object identifier"));
        }
        Ok(())
    }
}

fn arc(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| BerError::InvalidValue("object identifier arc too large"))
}

fn put_subidentifier(out: &mut BytesMut, value: u64) {
    let groups = (64 - value.leading_zeros()).div_ceil(7).max(1);
    for group in (0..groups).rev() {
        let bits = ((value >> (group * 7)) & 0x7F) as u8;
        let more = if group > 0 { 0x80 } else { 0 };
        out.put_u8(bits | more);
    }
}

fn take_subidentifier(buf: &[u8]) -> Result<(u64, usize)> {
    if buf[0] == 0x80 {
        return Err(BerError::InvalidValue("non-minimal object identifier arc"));
    }
    let mut value = 0u64;
    for (i, &octet) in buf.iter().enumerate() {
        if value > u64::MAX >> 7 {
            return Err(BerError::InvalidValue("object identifier arc too large"));
        }
        value = value << 7 | u64::from(octet & 0x7F);
        if octet & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(BerError::InvalidValue("truncated object identifier arc"))
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = BerError;

    fn from_str(s: &str) -> Result<Self> {
        let arcs = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| BerError::InvalidValue("object identifier arc is not a number"))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(arcs)
    }
}
