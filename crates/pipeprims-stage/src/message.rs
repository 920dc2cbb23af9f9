use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::queue::{Queue, QueueConfig};
use crate::stage::{MessageReadable, Propagation, Readable, Stage, Transfer, Writable};

/// Terminal stage that keeps message and message-series boundaries.
///
/// Reads are clamped to the current message. Once it is drained,
/// [`MessageReadable::next_message`] moves on to the next one.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    queue: Queue,
    // Length of every message still held; the last entry is the one in progress.
    lengths: VecDeque<u64>,
    // Completed messages per series; the last entry is the series in progress.
    series: VecDeque<usize>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            queue: Queue::with_config(config),
            lengths: VecDeque::from([0]),
            series: VecDeque::from([0]),
        }
    }

    /// All bytes held, across every message.
    pub fn total_size(&self) -> u64 {
        self.queue.size()
    }

    /// Remove the current completed message as one buffer.
    pub fn pop_message(&mut self) -> Option<Bytes> {
        if !self.any_messages() {
            return None;
        }
        let len = self.current();
        let mut message = BytesMut::with_capacity(usize::try_from(len).unwrap_or(0));
        let mut left = len;
        while left > 0 {
            let chunk = self
                .queue
                .pull_chunk(usize::try_from(left).unwrap_or(usize::MAX));
            if chunk.is_empty() {
                break;
            }
            left -= chunk.len() as u64;
            message.extend_from_slice(&chunk);
        }
        *self.current_mut() = 0;
        self.next_message();
        Some(message.freeze())
    }

    /// Copy up to `count` completed messages into `target`, ending each one.
    /// Returns how many were copied.
    pub fn copy_messages_to(
        &self,
        target: &mut dyn Writable,
        count: Option<usize>,
        blocking: bool,
    ) -> Result<usize> {
        let limit = count.unwrap_or(usize::MAX).min(self.messages());
        let mut walker = self.queue.walker();
        for (copied, &len) in self.lengths.iter().take(limit).enumerate() {
            let sent = walker.transfer_to(target, Some(len), blocking)?;
            if !sent.is_complete() || target.signal_message_end(Propagation::Unlimited, blocking)? {
                return Ok(copied);
            }
        }
        Ok(limit)
    }

    fn current(&self) -> u64 {
        self.lengths.front().copied().unwrap_or(0)
    }

    fn current_mut(&mut self) -> &mut u64 {
        if self.lengths.is_empty() {
            self.lengths.push_back(0);
        }
        &mut self.lengths[0]
    }

    fn record(&mut self, len: usize, end: Option<Propagation>) {
        if let Some(last) = self.lengths.back_mut() {
            *last += len as u64;
        }
        if end.is_some() {
            self.lengths.push_back(0);
            if let Some(series) = self.series.back_mut() {
                *series += 1;
            }
        }
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Writable for MessageQueue {
    fn push(&mut self, input: &[u8], end: Option<Propagation>, blocking: bool) -> Result<usize> {
        self.queue.push(input, None, blocking)?;
        self.record(input.len(), end);
        Ok(0)
    }

    fn push_bytes(&mut self, input: Bytes, end: Option<Propagation>, blocking: bool) -> Result<usize> {
        let len = input.len();
        self.queue.push_bytes(input, None, blocking)?;
        self.record(len, end);
        Ok(0)
    }

    fn isolated_message_series_end(&mut self, _blocking: bool) -> Result<bool> {
        self.series.push_back(0);
        Ok(false)
    }
}

impl Readable for MessageQueue {
    fn max_retrievable(&self) -> u64 {
        self.current()
    }

    fn pull(&mut self, out: &mut [u8]) -> Result<usize> {
        let limit = usize::try_from(self.current()).map_or(out.len(), |n| n.min(out.len()));
        let got = self.queue.pull(&mut out[..limit])?;
        *self.current_mut() -= got as u64;
        Ok(got)
    }

    fn peek_at(&self, offset: u64, out: &mut [u8]) -> Result<usize> {
        let available = self.current().saturating_sub(offset);
        let limit = usize::try_from(available).map_or(out.len(), |n| n.min(out.len()));
        self.queue.peek_at(offset, &mut out[..limit])
    }

    fn skip(&mut self, count: u64) -> Result<u64> {
        let skipped = self.queue.skip(count.min(self.current()))?;
        *self.current_mut() -= skipped;
        Ok(skipped)
    }

    fn transfer_to(
        &mut self,
        target: &mut dyn Writable,
        max: Option<u64>,
        blocking: bool,
    ) -> Result<Transfer> {
        let limit = max.map_or(self.current(), |max| max.min(self.current()));
        let sent = self.queue.transfer_to(target, Some(limit), blocking)?;
        *self.current_mut() -= sent.moved;
        Ok(sent)
    }

    fn copy_to(&self, target: &mut dyn Writable, max: Option<u64>, blocking: bool) -> Result<Transfer> {
        let limit = max.map_or(self.current(), |max| max.min(self.current()));
        self.queue.copy_to(target, Some(limit), blocking)
    }
}

impl MessageReadable for MessageQueue {
    fn messages(&self) -> usize {
        self.lengths.len() - 1
    }

    fn next_message(&mut self) -> bool {
        if self.messages() == 0 || self.current() > 0 {
            return false;
        }
        self.lengths.pop_front();
        if let Some(front) = self.series.front_mut() {
            *front = front.saturating_sub(1);
        }
        if self.series.front() == Some(&0) && self.series.len() > 1 {
            self.series.pop_front();
        }
        true
    }

    fn messages_in_series(&self) -> usize {
        self.series.front().copied().unwrap_or(0)
    }

    fn message_series(&self) -> usize {
        self.series.len() - 1
    }
}

impl Stage for MessageQueue {
    fn name(&self) -> &'static str {
        "MessageQueue"
    }

    fn as_readable(&self) -> Option<&dyn Readable> {
        Some(self)
    }

    fn as_readable_mut(&mut self) -> Option<&mut dyn Readable> {
        Some(self)
    }

    fn as_message_readable(&self) -> Option<&dyn MessageReadable> {
        Some(self)
    }

    fn as_message_readable_mut(&mut self) -> Option<&mut dyn MessageReadable> {
        Some(self)
    }
}
