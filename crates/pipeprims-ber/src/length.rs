//! The X.690 length field.
//!
//! - Short form: one octet `0x00..=0x7F` holding the length itself
//! - Long form: `0x80 | k` followed by `k` big-endian octets
//! - Indefinite form: `0x80` alone, content ends with `00 00`
//!
//! Encoding always produces the minimal form. Decoding accepts long forms
//! with leading zero octets, but fails as soon as the value would no longer
//! fit in a `usize`.

use bytes::{BufMut, BytesMut};
use pipeprims_stage::{Readable, Writable};

use crate::error::{BerError, Result};

const INDEFINITE: u8 = 0x80;
const RESERVED: u8 = 0xFF;
const LONG_FORM: u8 = 0x80;

/// Longest length field this platform can produce: the form octet plus one
/// octet per byte of `usize`.
pub const MAX_LENGTH_OCTETS: usize = 1 + std::mem::size_of::<usize>();

/// A decoded length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Definite(usize),
    Indefinite,
}

impl Length {
    pub fn definite(self) -> Option<usize> {
        match self {
            Self::Definite(len) => Some(len),
            Self::Indefinite => None,
        }
    }

    pub fn is_indefinite(self) -> bool {
        matches!(self, Self::Indefinite)
    }
}

fn length_octets(value: usize) -> ([u8; MAX_LENGTH_OCTETS], usize) {
    let mut out = [0u8; MAX_LENGTH_OCTETS];
    if value < 0x80 {
        out[0] = value as u8;
        return (out, 1);
    }
    let be = value.to_be_bytes();
    let skip = (value.leading_zeros() / 8) as usize;
    let k = be.len() - skip;
    out[0] = LONG_FORM | k as u8;
    out[1..=k].copy_from_slice(&be[skip..]);
    (out, 1 + k)
}

/// Number of octets the minimal length field for `value` occupies.
pub fn encoded_len(value: usize) -> usize {
    length_octets(value).1
}

/// Write the minimal length field for `value` into `dst`.
///
/// Returns the number of octets written.
pub fn encode_length<W: Writable + ?Sized>(dst: &mut W, value: usize) -> Result<usize> {
    let (octets, len) = length_octets(value);
    dst.put(&octets[..len])?;
    Ok(len)
}

/// Append the minimal length field for `value` to `buf`.
pub fn encode_length_into(value: usize, buf: &mut BytesMut) -> usize {
    let (octets, len) = length_octets(value);
    buf.put_slice(&octets[..len]);
    len
}

/// Write the indefinite length marker.
pub fn encode_indefinite<W: Writable + ?Sized>(dst: &mut W) -> Result<()> {
    dst.put_byte(INDEFINITE)?;
    Ok(())
}

fn accumulate(acc: usize, octet: u8) -> Result<usize> {
    if acc > usize::MAX >> 8 {
        return Err(BerError::LengthOverflow);
    }
    Ok(acc << 8 | usize::from(octet))
}

/// Parse a length field from the front of `buf`.
///
/// Returns `Ok(None)` if more octets are needed, or the length and the
/// number of octets it occupies. Overflow is reported as soon as the
/// available octets prove it, even before the field is complete.
pub fn parse_length(buf: &[u8]) -> Result<Option<(Length, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    match first {
        INDEFINITE => Ok(Some((Length::Indefinite, 1))),
        RESERVED => Err(BerError::ReservedLength),
        short if short & LONG_FORM == 0 => Ok(Some((Length::Definite(usize::from(short)), 1))),
        long => {
            let k = usize::from(long & !LONG_FORM);
            let mut acc = 0usize;
            for &octet in buf[1..].iter().take(k) {
                acc = accumulate(acc, octet)?;
            }
            if buf.len() < 1 + k {
                return Ok(None);
            }
            Ok(Some((Length::Definite(acc), 1 + k)))
        }
    }
}

/// Read a length field from `src`.
pub fn decode_length<R: Readable + ?Sized>(src: &mut R) -> Result<Length> {
    let first = next_octet(src, 1)?;
    match first {
        INDEFINITE => Ok(Length::Indefinite),
        RESERVED => Err(BerError::ReservedLength),
        short if short & LONG_FORM == 0 => Ok(Length::Definite(usize::from(short))),
        long => {
            let k = long & !LONG_FORM;
            let mut acc = 0usize;
            for left in (1..=u64::from(k)).rev() {
                acc = accumulate(acc, next_octet(src, left)?)?;
            }
            Ok(Length::Definite(acc))
        }
    }
}

/// Read a length field that must use the definite form.
pub fn decode_definite_length<R: Readable + ?Sized>(src: &mut R) -> Result<usize> {
    decode_length(src)?
        .definite()
        .ok_or(BerError::IndefiniteNotAllowed)
}

fn next_octet<R: Readable + ?Sized>(src: &mut R, needed: u64) -> Result<u8> {
    src.pull_byte()?.ok_or(BerError::Truncated {
        needed,
        available: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeprims_stage::Queue;
    use rstest::rstest;

    fn encode(value: usize) -> Vec<u8> {
        let mut queue = Queue::new();
        let written = encode_length(&mut queue, value).unwrap();
        assert_eq!(written, encoded_len(value));
        queue.to_vec()
    }

    #[rstest]
    #[case(0, &[0x00])]
    #[case(1, &[0x01])]
    #[case(127, &[0x7F])]
    #[case(128, &[0x81, 0x80])]
    #[case(255, &[0x81, 0xFF])]
    #[case(256, &[0x82, 0x01, 0x00])]
    #[case(65_535, &[0x82, 0xFF, 0xFF])]
    #[case(65_536, &[0x83, 0x01, 0x00, 0x00])]
    fn encodes_minimal_form(#[case] value: usize, #[case] expected: &[u8]) {
        assert_eq!(encode(value), expected);

        let mut buf = BytesMut::new();
        assert_eq!(encode_length_into(value, &mut buf), expected.len());
        assert_eq!(&buf[..], expected);
    }

    #[rstest]
    #[case(0)]
    #[case(127)]
    #[case(128)]
    #[case(255)]
    #[case(256)]
    #[case(usize::MAX)]
    fn decodes_what_it_encodes(#[case] value: usize) {
        let mut queue = Queue::from(encode(value));
        assert_eq!(decode_length(&mut queue).unwrap(), Length::Definite(value));
        assert!(queue.is_empty());
    }

    #[test]
    fn indefinite_marker() {
        let mut queue = Queue::new();
        encode_indefinite(&mut queue).unwrap();
        assert_eq!(queue.to_vec(), [0x80]);
        assert_eq!(decode_length(&mut queue).unwrap(), Length::Indefinite);
    }

    #[test]
    fn definite_wrapper_rejects_indefinite() {
        let mut queue = Queue::from(&[0x80][..]);
        assert!(matches!(
            decode_definite_length(&mut queue),
            Err(BerError::IndefiniteNotAllowed)
        ));
    }

    #[test]
    fn non_minimal_long_form_is_accepted() {
        let mut queue = Queue::from(&[0x82, 0x00, 0x05][..]);
        assert_eq!(decode_length(&mut queue).unwrap(), Length::Definite(5));
    }

    #[test]
    fn reserved_octet_is_rejected() {
        let mut queue = Queue::from(&[0xFF][..]);
        assert!(matches!(decode_length(&mut queue), Err(BerError::ReservedLength)));
        assert!(matches!(parse_length(&[0xFF]), Err(BerError::ReservedLength)));
    }

    #[test]
    fn one_past_usize_max_overflows() {
        // 2^(8 * size_of::<usize>()) needs one more octet than usize holds.
        let mut field = vec![LONG_FORM | (MAX_LENGTH_OCTETS as u8), 0x01];
        field.extend(std::iter::repeat(0x00).take(MAX_LENGTH_OCTETS - 1));

        let mut queue = Queue::from(field.clone());
        assert!(matches!(decode_length(&mut queue), Err(BerError::LengthOverflow)));
        assert!(matches!(parse_length(&field), Err(BerError::LengthOverflow)));
    }

    #[test]
    fn truncated_long_form() {
        let mut queue = Queue::from(&[0x82, 0x01][..]);
        assert!(matches!(
            decode_length(&mut queue),
            Err(BerError::Truncated { needed: 1, .. })
        ));
        assert!(matches!(decode_length(&mut Queue::new()), Err(BerError::Truncated { .. })));
    }

    #[test]
    fn parse_waits_for_more_octets() {
        assert_eq!(parse_length(&[]).unwrap(), None);
        assert_eq!(parse_length(&[0x82, 0x01]).unwrap(), None);
        assert_eq!(
            parse_length(&[0x82, 0x01, 0x00, 0xAA]).unwrap(),
            Some((Length::Definite(256), 3))
        );
        assert_eq!(parse_length(&[0x80]).unwrap(), Some((Length::Indefinite, 1)));
    }
}
