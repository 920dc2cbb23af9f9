use bytes::{Bytes, BytesMut};
use pipeprims_stage::{Readable, Result as StageResult};
use tracing::debug;

use crate::error::{BerError, Result};
use crate::length::{decode_length, Length};
use crate::tag::Tag;

const END_OF_CONTENTS: [u8; 2] = [0x00, 0x00];

/// Peek at the identifier octet of the next value in `src`.
///
/// Returns `Ok(None)` when `src` is empty.
pub fn peek_tag<R: Readable + ?Sized>(src: &R) -> Result<Option<Tag>> {
    src.peek_byte()?.map(Tag::from_octet).transpose()
}

/// Reads one tag-length-value frame from a source.
///
/// Construction consumes the tag and length. While open, the decoder is
/// itself [`Readable`], clamped to the declared content for definite lengths,
/// so a nested value is decoded by opening another decoder on this one.
///
/// [`Decoder::close`] checks that the content was fully consumed and, for
/// indefinite lengths, consumes the end-of-contents octets. A decoder dropped
/// without being closed closes itself and logs any failure; prefer
/// [`Decoder::scope`], which closes on every path and reports both failures.
pub struct Decoder<'s, S: Readable + ?Sized> {
    source: &'s mut S,
    tag: Tag,
    // None for indefinite-length frames.
    remaining: Option<usize>,
    closed: bool,
}

impl<'s, S: Readable + ?Sized> Decoder<'s, S> {
    /// Open the next value of `source`, which must carry tag `expected`.
    pub fn new(source: &'s mut S, expected: Tag) -> Result<Self> {
        let octet = source.pull_byte()?.ok_or(BerError::Truncated {
            needed: 1,
            available: 0,
        })?;
        let found = Tag::from_octet(octet)?;
        if found != expected {
            return Err(BerError::UnexpectedTag { expected, found });
        }

        let remaining = match decode_length(source)? {
            Length::Indefinite if !expected.is_constructed() => {
                return Err(BerError::IndefinitePrimitive);
            }
            Length::Indefinite => None,
            Length::Definite(len) => {
                let available = source.max_retrievable();
                if len as u64 > available {
                    return Err(BerError::Truncated {
                        needed: len as u64,
                        available,
                    });
                }
                Some(len)
            }
        };

        Ok(Self {
            source,
            tag: expected,
            remaining,
            closed: false,
        })
    }

    pub fn sequence(source: &'s mut S) -> Result<Self> {
        Self::new(source, Tag::SEQUENCE)
    }

    pub fn set(source: &'s mut S) -> Result<Self> {
        Self::new(source, Tag::SET)
    }

    /// Open a value, run `f` on it and close it, whatever `f` returns.
    ///
    /// If `f` fails and closing fails too, the close failure is kept as the
    /// secondary error of [`BerError::Unwound`].
    pub fn scope<T, F>(source: &'s mut S, tag: Tag, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let mut decoder = Self::new(source, tag)?;
        match f(&mut decoder) {
            Ok(value) => {
                decoder.close()?;
                Ok(value)
            }
            Err(primary) => match decoder.close() {
                Ok(()) => Err(primary),
                Err(secondary) => Err(BerError::unwound(primary, secondary)),
            },
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn is_definite(&self) -> bool {
        self.remaining.is_some()
    }

    /// Content bytes left, or `None` for an indefinite-length frame.
    pub fn remaining(&self) -> Option<usize> {
        self.remaining
    }

    /// True when the content is exhausted: nothing left of a definite frame,
    /// or end-of-contents next in an indefinite one.
    pub fn end_reached(&self) -> Result<bool> {
        match self.remaining {
            Some(left) => Ok(left == 0),
            None => {
                let mut marker = [0xFFu8; 2];
                let got = self.source.peek(&mut marker)?;
                Ok(got == 2 && marker == END_OF_CONTENTS)
            }
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.pull_byte()?.ok_or(BerError::Truncated {
            needed: 1,
            available: 0,
        })
    }

    /// Read one byte, which must equal `expected`.
    pub fn expect_byte(&mut self, expected: u8) -> Result<()> {
        if self.read_byte()? != expected {
            return Err(BerError::InvalidValue("unexpected content byte"));
        }
        Ok(())
    }

    /// Fill `buf` entirely from the content.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let available = self.max_retrievable();
        if (buf.len() as u64) > available {
            return Err(BerError::Truncated {
                needed: buf.len() as u64,
                available,
            });
        }
        let got = self.pull(buf)?;
        if got < buf.len() {
            return Err(BerError::Truncated {
                needed: buf.len() as u64,
                available: got as u64,
            });
        }
        Ok(())
    }

    /// Read the rest of a definite-length content.
    pub fn read_remaining(&mut self) -> Result<Bytes> {
        let left = self.remaining.ok_or(BerError::IndefiniteNotAllowed)?;
        let mut content = BytesMut::zeroed(left);
        self.read_exact(&mut content)?;
        Ok(content.freeze())
    }

    /// Finish the frame. Calling it again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.remaining {
            Some(0) => Ok(()),
            Some(remaining) => Err(BerError::TrailingData { remaining }),
            None => {
                if !self.end_reached()? {
                    return Err(BerError::MissingEndOfContents);
                }
                self.source.skip(END_OF_CONTENTS.len() as u64)?;
                Ok(())
            }
        }
    }

    fn limit(&self, wanted: usize) -> usize {
        self.remaining.map_or(wanted, |left| left.min(wanted))
    }

    fn consumed(&mut self, count: usize) {
        if let Some(left) = self.remaining.as_mut() {
            *left -= count;
        }
    }
}

impl<S: Readable + ?Sized> Readable for Decoder<'_, S> {
    fn max_retrievable(&self) -> u64 {
        let available = self.source.max_retrievable();
        self.remaining
            .map_or(available, |left| available.min(left as u64))
    }

    fn pull(&mut self, out: &mut [u8]) -> StageResult<usize> {
        let limit = self.limit(out.len());
        let got = self.source.pull(&mut out[..limit])?;
        self.consumed(got);
        Ok(got)
    }

    fn peek_at(&self, offset: u64, out: &mut [u8]) -> StageResult<usize> {
        let limit = match self.remaining {
            Some(left) => {
                let after = (left as u64).saturating_sub(offset);
                usize::try_from(after).map_or(out.len(), |after| after.min(out.len()))
            }
            None => out.len(),
        };
        self.source.peek_at(offset, &mut out[..limit])
    }

    fn skip(&mut self, count: u64) -> StageResult<u64> {
        let count = self
            .remaining
            .map_or(count, |left| count.min(left as u64));
        let skipped = self.source.skip(count)?;
        self.consumed(skipped as usize);
        Ok(skipped)
    }
}

impl<S: Readable + ?Sized> Drop for Decoder<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(tag = %self.tag, error = %err, "implicit decoder close failed");
        }
    }
}
