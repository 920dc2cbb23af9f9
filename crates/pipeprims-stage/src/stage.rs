use bytes::Bytes;

use crate::attachment::Attachment;
use crate::error::{Result, StageError};

/// Scratch size used by the default copy/transfer implementations.
pub(crate) const TRANSFER_CHUNK: usize = 4096;

/// An owned, type-erased pipeline element.
pub type BoxedStage = Box<dyn Stage>;

/// How far a message-end or series-end signal travels down a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Deliver to this stage and `n` further hops.
    Hops(u32),
    /// Deliver to every stage in the chain.
    Unlimited,
}

impl Propagation {
    /// Handle the signal at the receiving stage only.
    pub const LOCAL: Self = Self::Hops(0);

    /// The propagation passed on to the next hop, or `None` when the signal stops here.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unlimited => Some(Self::Unlimited),
            Self::Hops(0) => None,
            Self::Hops(n) => Some(Self::Hops(n - 1)),
        }
    }
}

/// Outcome of a transfer or copy between stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes delivered to the target.
    pub moved: u64,
    /// Bytes the target refused in non-blocking mode. Zero when complete.
    pub blocked: usize,
}

impl Transfer {
    /// True when nothing was left blocked.
    pub fn is_complete(&self) -> bool {
        self.blocked == 0
    }
}

/// A stage that accepts bytes and message boundaries.
pub trait Writable {
    /// Push `input`, optionally closing the current message.
    ///
    /// Returns the number of bytes that were not accepted. A blocking push
    /// always accepts everything. Non-blocking callers must repeat the same
    /// call with the same arguments until the return value is zero.
    fn push(&mut self, input: &[u8], end: Option<Propagation>, blocking: bool) -> Result<usize>;

    /// Push an owned chunk. Buffering stages link it without copying.
    fn push_bytes(&mut self, input: Bytes, end: Option<Propagation>, blocking: bool) -> Result<usize> {
        self.push(&input, end, blocking)
    }

    /// Blocking push without a message boundary.
    fn put(&mut self, input: &[u8]) -> Result<()> {
        self.push(input, None, true)?;
        Ok(())
    }

    /// Blocking push of a single byte.
    fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.put(&[byte])
    }

    /// Blocking push that also ends the message everywhere downstream.
    fn put_message(&mut self, input: &[u8]) -> Result<()> {
        self.push(input, Some(Propagation::Unlimited), true)?;
        Ok(())
    }

    /// Close the current message. Returns true if the signal was blocked.
    fn signal_message_end(&mut self, propagation: Propagation, blocking: bool) -> Result<bool> {
        Ok(self.push(&[], Some(propagation), blocking)? != 0)
    }

    /// Close the current message series at this stage only.
    fn isolated_message_series_end(&mut self, _blocking: bool) -> Result<bool> {
        Ok(false)
    }

    /// Flush buffered output at this stage only.
    fn isolated_flush(&mut self, _hard: bool, _blocking: bool) -> Result<bool> {
        Ok(false)
    }
}

/// A stage holding bytes that can be retrieved.
pub trait Readable {
    /// Number of bytes that can currently be retrieved.
    fn max_retrievable(&self) -> u64;

    fn any_retrievable(&self) -> bool {
        self.max_retrievable() > 0
    }

    /// Remove up to `out.len()` bytes. Returns how many were written.
    fn pull(&mut self, out: &mut [u8]) -> Result<usize>;

    /// Read up to `out.len()` bytes starting `offset` bytes in, without consuming.
    fn peek_at(&self, offset: u64, out: &mut [u8]) -> Result<usize>;

    fn peek(&self, out: &mut [u8]) -> Result<usize> {
        self.peek_at(0, out)
    }

    fn pull_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok((self.pull(&mut byte)? == 1).then_some(byte[0]))
    }

    fn peek_byte(&self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok((self.peek(&mut byte)? == 1).then_some(byte[0]))
    }

    /// Discard up to `count` bytes. Returns how many were discarded.
    fn skip(&mut self, count: u64) -> Result<u64> {
        let mut scratch = [0u8; TRANSFER_CHUNK];
        let mut skipped = 0u64;
        while skipped < count {
            let want = chunk_len(count - skipped);
            let got = self.pull(&mut scratch[..want])?;
            if got == 0 {
                break;
            }
            skipped += got as u64;
        }
        Ok(skipped)
    }

    /// Move up to `max` bytes (all when `None`) into `target`.
    fn transfer_to(
        &mut self,
        target: &mut dyn Writable,
        max: Option<u64>,
        blocking: bool,
    ) -> Result<Transfer> {
        drain(self, max, |chunk| target.push(chunk, None, blocking))
    }

    /// Move up to `max` bytes into a named channel of `target`.
    fn transfer_to_channel(
        &mut self,
        target: &mut dyn ChannelWritable,
        channel: &str,
        max: Option<u64>,
        blocking: bool,
    ) -> Result<Transfer> {
        drain(self, max, |chunk| target.channel_push(channel, chunk, None, blocking))
    }

    /// Duplicate up to `max` bytes into `target` without consuming them.
    fn copy_to(&self, target: &mut dyn Writable, max: Option<u64>, blocking: bool) -> Result<Transfer> {
        duplicate(self, max, |chunk| target.push(chunk, None, blocking))
    }

    /// Duplicate up to `max` bytes into a named channel of `target`.
    fn copy_to_channel(
        &self,
        target: &mut dyn ChannelWritable,
        channel: &str,
        max: Option<u64>,
        blocking: bool,
    ) -> Result<Transfer> {
        duplicate(self, max, |chunk| target.channel_push(channel, chunk, None, blocking))
    }
}

fn chunk_len(remaining: u64) -> usize {
    usize::try_from(remaining).map_or(TRANSFER_CHUNK, |n| n.min(TRANSFER_CHUNK))
}

fn duplicate<R, F>(source: &R, max: Option<u64>, mut sink: F) -> Result<Transfer>
where
    R: Readable + ?Sized,
    F: FnMut(&[u8]) -> Result<usize>,
{
    let mut scratch = [0u8; TRANSFER_CHUNK];
    let limit = max.unwrap_or(u64::MAX);
    let mut moved = 0u64;
    while moved < limit {
        let want = chunk_len(limit - moved);
        let got = source.peek_at(moved, &mut scratch[..want])?;
        if got == 0 {
            break;
        }
        let blocked = sink(&scratch[..got])?;
        moved += (got - blocked) as u64;
        if blocked > 0 {
            return Ok(Transfer { moved, blocked });
        }
    }
    Ok(Transfer { moved, blocked: 0 })
}

fn drain<R, F>(source: &mut R, max: Option<u64>, mut sink: F) -> Result<Transfer>
where
    R: Readable + ?Sized,
    F: FnMut(&[u8]) -> Result<usize>,
{
    let mut scratch = [0u8; TRANSFER_CHUNK];
    let limit = max.unwrap_or(u64::MAX);
    let mut moved = 0u64;
    while moved < limit {
        let want = chunk_len(limit - moved);
        let got = source.peek(&mut scratch[..want])?;
        if got == 0 {
            break;
        }
        let blocked = sink(&scratch[..got])?;
        let accepted = got - blocked;
        source.skip(accepted as u64)?;
        moved += accepted as u64;
        if blocked > 0 {
            return Ok(Transfer { moved, blocked });
        }
    }
    Ok(Transfer { moved, blocked: 0 })
}

/// A readable stage that also keeps message boundaries.
pub trait MessageReadable: Readable {
    /// Completed messages waiting to be read.
    fn messages(&self) -> usize;

    fn any_messages(&self) -> bool {
        self.messages() > 0
    }

    /// Advance past the current message once it has been fully read.
    ///
    /// Returns false if the current message still has bytes or is not complete.
    fn next_message(&mut self) -> bool;

    /// Completed messages left in the current series.
    fn messages_in_series(&self) -> usize {
        self.messages()
    }

    /// Completed message series.
    fn message_series(&self) -> usize {
        0
    }

    /// Drop up to `count` whole messages. Returns how many were dropped.
    fn skip_messages(&mut self, count: usize) -> Result<usize> {
        let mut skipped = 0;
        while skipped < count && self.any_messages() {
            let rest = self.max_retrievable();
            self.skip(rest)?;
            self.next_message();
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Move up to `count` whole messages (all when `None`) into `target`,
    /// ending each one downstream. Returns how many messages completed.
    fn transfer_messages_to(
        &mut self,
        target: &mut dyn Writable,
        count: Option<usize>,
        blocking: bool,
    ) -> Result<usize> {
        let limit = count.unwrap_or(usize::MAX);
        let mut transferred = 0;
        while transferred < limit && self.any_messages() {
            let sent = self.transfer_to(target, None, blocking)?;
            if !sent.is_complete() {
                break;
            }
            if target.signal_message_end(Propagation::Unlimited, blocking)? {
                break;
            }
            self.next_message();
            transferred += 1;
        }
        Ok(transferred)
    }
}

/// A stage that accepts input addressed to named channels.
pub trait ChannelWritable: Writable {
    fn channel_push(
        &mut self,
        channel: &str,
        input: &[u8],
        end: Option<Propagation>,
        blocking: bool,
    ) -> Result<usize>;

    fn channel_put(&mut self, channel: &str, input: &[u8]) -> Result<()> {
        self.channel_push(channel, input, None, true)?;
        Ok(())
    }

    fn channel_message_end(&mut self, channel: &str, propagation: Propagation, blocking: bool) -> Result<bool> {
        Ok(self.channel_push(channel, &[], Some(propagation), blocking)? != 0)
    }

    fn channel_message_series_end(
        &mut self,
        channel: &str,
        propagation: Propagation,
        blocking: bool,
    ) -> Result<bool>;
}

/// A stage owning a single downstream attachment.
pub trait Attachable {
    fn attachment(&self) -> &Attachment;

    fn attachment_mut(&mut self) -> &mut Attachment;

    /// Remove and return the attached chain.
    fn take_attachment(&mut self) -> Option<BoxedStage> {
        self.attachment_mut().take()
    }

    /// Replace the attached chain, returning the previous one.
    fn set_attachment(&mut self, next: Option<BoxedStage>) -> Option<BoxedStage> {
        self.attachment_mut().replace(next)
    }

    fn detach(&mut self) -> Option<BoxedStage> {
        self.set_attachment(None)
    }

    /// Attach `next` at the end of the chain.
    ///
    /// Walks through attachable stages and attaches to the last one. When the
    /// current attachment is terminal it is replaced and returned.
    fn attach(&mut self, next: BoxedStage) -> Option<BoxedStage> {
        if let Some(inner) = self
            .attachment_mut()
            .get_mut()
            .and_then(|stage| stage.as_attachable_mut())
        {
            return inner.attach(next);
        }
        self.set_attachment(Some(next))
    }
}

/// A pipeline element.
///
/// Every stage is writable. Other capabilities are advertised through the
/// `as_*` queries; the checked accessors turn a missing capability into
/// [`StageError::Unsupported`].
pub trait Stage: Writable {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    fn as_readable(&self) -> Option<&dyn Readable> {
        None
    }

    fn as_readable_mut(&mut self) -> Option<&mut dyn Readable> {
        None
    }

    fn as_message_readable(&self) -> Option<&dyn MessageReadable> {
        None
    }

    fn as_message_readable_mut(&mut self) -> Option<&mut dyn MessageReadable> {
        None
    }

    fn as_attachable(&self) -> Option<&dyn Attachable> {
        None
    }

    fn as_attachable_mut(&mut self) -> Option<&mut dyn Attachable> {
        None
    }

    fn as_channel_writable_mut(&mut self) -> Option<&mut dyn ChannelWritable> {
        None
    }

    fn readable(&self) -> Result<&dyn Readable> {
        let stage = self.name();
        self.as_readable()
            .ok_or_else(|| StageError::unsupported(stage, "peek"))
    }

    fn readable_mut(&mut self) -> Result<&mut dyn Readable> {
        let stage = self.name();
        self.as_readable_mut()
            .ok_or_else(|| StageError::unsupported(stage, "pull"))
    }

    fn message_readable_mut(&mut self) -> Result<&mut dyn MessageReadable> {
        let stage = self.name();
        self.as_message_readable_mut()
            .ok_or_else(|| StageError::unsupported(stage, "message retrieval"))
    }

    fn channel_writable_mut(&mut self) -> Result<&mut dyn ChannelWritable> {
        let stage = self.name();
        self.as_channel_writable_mut()
            .ok_or_else(|| StageError::unsupported(stage, "channel push"))
    }

    /// Close the message series here and `propagation` hops downstream.
    fn signal_message_series_end(&mut self, propagation: Propagation, blocking: bool) -> Result<bool> {
        if self.isolated_message_series_end(blocking)? {
            return Ok(true);
        }
        match (propagation.next(), self.downstream_mut()) {
            (Some(next), Some(stage)) => stage.signal_message_series_end(next, blocking),
            _ => Ok(false),
        }
    }

    /// Flush here and `propagation` hops downstream.
    fn flush(&mut self, hard: bool, propagation: Propagation, blocking: bool) -> Result<bool> {
        if self.isolated_flush(hard, blocking)? {
            return Ok(true);
        }
        match (propagation.next(), self.downstream_mut()) {
            (Some(next), Some(stage)) => stage.flush(hard, next, blocking),
            _ => Ok(false),
        }
    }

    /// The attached stage, if this stage is attachable and attached.
    fn downstream_mut(&mut self) -> Option<&mut (dyn Stage + 'static)> {
        self.as_attachable_mut()
            .and_then(|attachable| attachable.attachment_mut().get_mut())
    }
}
