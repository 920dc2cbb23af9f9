use bytes::Bytes;
use pipeprims_stage::{Propagation, Queue, Result as StageResult, Writable};
use tracing::debug;

use crate::error::{BerError, Result};
use crate::length::{encode_indefinite, encode_length};
use crate::tag::Tag;

/// Write a tag and a definite length.
pub fn encode_header<W: Writable + ?Sized>(dst: &mut W, tag: Tag, len: usize) -> Result<()> {
    dst.put_byte(tag.octet())?;
    encode_length(dst, len)?;
    Ok(())
}

/// Write a complete primitive value.
pub fn encode_primitive<W: Writable + ?Sized>(dst: &mut W, tag: Tag, content: &[u8]) -> Result<()> {
    encode_header(dst, tag, content.len())?;
    dst.put(content)?;
    Ok(())
}

enum Mode {
    // Content is held until close so the length can be written first.
    Buffered(Queue),
    // Header already written; content streams straight through.
    Indefinite,
}

/// Writes one tag-length-value frame to a destination.
///
/// The encoder is [`Writable`]: bytes pushed to it become the content.
/// By default the content is buffered and the frame is written on
/// [`Encoder::close`] with a definite length, which is the DER form. An
/// [`Encoder::indefinite`] encoder writes its header immediately and ends the
/// content with end-of-contents octets on close.
///
/// Message boundaries pushed into an encoder are not forwarded.
pub struct Encoder<'d, W: Writable + ?Sized> {
    dest: &'d mut W,
    tag: Tag,
    mode: Mode,
    closed: bool,
}

impl<'d, W: Writable + ?Sized> Encoder<'d, W> {
    pub fn new(dest: &'d mut W, tag: Tag) -> Self {
        Self {
            dest,
            tag,
            mode: Mode::Buffered(Queue::new()),
            closed: false,
        }
    }

    pub fn sequence(dest: &'d mut W) -> Self {
        Self::new(dest, Tag::SEQUENCE)
    }

    pub fn set(dest: &'d mut W) -> Self {
        Self::new(dest, Tag::SET)
    }

    /// Start an indefinite-length frame. Only constructed tags allow it.
    pub fn indefinite(dest: &'d mut W, tag: Tag) -> Result<Self> {
        if !tag.is_constructed() {
            return Err(BerError::IndefinitePrimitive);
        }
        dest.put_byte(tag.octet())?;
        encode_indefinite(dest)?;
        Ok(Self {
            dest,
            tag,
            mode: Mode::Indefinite,
            closed: false,
        })
    }

    /// Run `f` on a new definite-length encoder and close it.
    ///
    /// If `f` fails the encoder is abandoned, so a failed definite frame
    /// leaves nothing in `dest`.
    pub fn scope<T, F>(dest: &'d mut W, tag: Tag, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        Self::finish(Self::new(dest, tag), f)
    }

    /// Like [`Encoder::scope`], with an indefinite-length encoder.
    pub fn scope_indefinite<T, F>(dest: &'d mut W, tag: Tag, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        Self::finish(Self::indefinite(dest, tag)?, f)
    }

    fn finish<T, F>(mut encoder: Self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        match f(&mut encoder) {
            Ok(value) => {
                encoder.close()?;
                Ok(value)
            }
            Err(err) => {
                encoder.abandon();
                Err(err)
            }
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn is_definite(&self) -> bool {
        matches!(self.mode, Mode::Buffered(_))
    }

    /// Content bytes buffered so far. Always zero for indefinite frames.
    pub fn buffered(&self) -> u64 {
        match &self.mode {
            Mode::Buffered(body) => body.size(),
            Mode::Indefinite => 0,
        }
    }

    /// Close without writing anything further. Buffered content is dropped.
    pub fn abandon(&mut self) {
        self.closed = true;
        if let Mode::Buffered(body) = &mut self.mode {
            body.clear();
        }
    }

    /// Write the frame out. Calling it again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &mut self.mode {
            Mode::Buffered(body) => {
                let len = usize::try_from(body.size()).map_err(|_| BerError::LengthOverflow)?;
                encode_header(&mut *self.dest, self.tag, len)?;
                while !body.is_empty() {
                    let chunk = body.pull_chunk(usize::MAX);
                    self.dest.push_bytes(chunk, None, true)?;
                }
            }
            Mode::Indefinite => {
                self.dest.put(&[0x00, 0x00])?;
            }
        }
        Ok(())
    }
}

impl<W: Writable + ?Sized> Writable for Encoder<'_, W> {
    fn push(&mut self, input: &[u8], _end: Option<Propagation>, blocking: bool) -> StageResult<usize> {
        match &mut self.mode {
            Mode::Buffered(body) => body.push(input, None, blocking),
            Mode::Indefinite => self.dest.push(input, None, blocking),
        }
    }

    fn push_bytes(&mut self, input: Bytes, _end: Option<Propagation>, blocking: bool) -> StageResult<usize> {
        match &mut self.mode {
            Mode::Buffered(body) => body.push_bytes(input, None, blocking),
            Mode::Indefinite => self.dest.push_bytes(input, None, blocking),
        }
    }
}

impl<W: Writable + ?Sized> Drop for Encoder<'_, W> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(tag = %self.tag, error = %err, "implicit encoder close failed");
        }
    }
}
