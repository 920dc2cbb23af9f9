use std::collections::VecDeque;
use std::fmt;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::Result;
use crate::stage::{Propagation, Readable, Stage, Transfer, Writable};

/// Default capacity of a queue node: 256 bytes.
pub const DEFAULT_NODE_SIZE: usize = 256;

/// Configuration for a [`Queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Capacity of each node allocated by `push`. Default: 256 bytes.
    pub node_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            node_size: DEFAULT_NODE_SIZE,
        }
    }
}

/// Unbounded FIFO byte buffer made of fixed-capacity nodes.
///
/// Pushed bytes fill the open tail node; a full node is sealed and a new one
/// started, so stored data is never reallocated. Owned chunks handed over with
/// [`Writable::push_bytes`] are linked as whole nodes, and transfers between
/// queues move nodes rather than bytes.
///
/// Pulling or peeking more than is stored returns what is stored.
#[derive(Clone)]
pub struct Queue {
    sealed: VecDeque<Bytes>,
    tail: BytesMut,
    size: u64,
    node_size: usize,
}

impl Queue {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            sealed: VecDeque::new(),
            tail: BytesMut::new(),
            size: 0,
            node_size: config.node_size.max(1),
        }
    }

    /// Stored bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Nodes currently holding data.
    pub fn node_count(&self) -> usize {
        self.sealed.len() + usize::from(!self.tail.is_empty())
    }

    pub fn clear(&mut self) {
        self.sealed.clear();
        self.tail.clear();
        self.size = 0;
    }

    /// Put bytes back at the front of the queue.
    pub fn unget(&mut self, data: &[u8]) {
        self.unget_bytes(Bytes::copy_from_slice(data));
    }

    pub fn unget_bytes(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.size += data.len() as u64;
        self.sealed.push_front(data);
    }

    /// Remove up to `max` bytes from the front node without copying.
    pub fn pull_chunk(&mut self, max: usize) -> Bytes {
        let chunk = match self.sealed.front_mut() {
            Some(front) => {
                let n = front.len().min(max);
                let chunk = front.split_to(n);
                if front.is_empty() {
                    self.sealed.pop_front();
                }
                chunk
            }
            None => {
                let n = self.tail.len().min(max);
                self.tail.split_to(n).freeze()
            }
        };
        self.size -= chunk.len() as u64;
        chunk
    }

    /// Remove up to `max` bytes as one contiguous buffer.
    pub fn pull_bytes(&mut self, max: usize) -> Bytes {
        let want = usize::try_from(self.size).map_or(max, |size| size.min(max));
        let first = self.pull_chunk(want);
        if first.len() == want {
            return first;
        }
        let mut joined = BytesMut::with_capacity(want);
        joined.extend_from_slice(&first);
        while joined.len() < want {
            let chunk = self.pull_chunk(want - joined.len());
            if chunk.is_empty() {
                break;
            }
            joined.extend_from_slice(&chunk);
        }
        joined.freeze()
    }

    /// Copy of the stored bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        for segment in self.segments() {
            out.extend_from_slice(segment);
        }
        out
    }

    /// A read cursor that leaves the queue untouched.
    pub fn walker(&self) -> Walker<'_> {
        Walker {
            queue: self,
            position: 0,
        }
    }

    fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.sealed
            .iter()
            .map(|node| node.as_ref())
            .chain(std::iter::once(self.tail.as_ref()))
            .filter(|segment| !segment.is_empty())
    }

    fn seal_tail(&mut self) {
        if !self.tail.is_empty() {
            let node = self.tail.split().freeze();
            self.sealed.push_back(node);
        }
    }

    fn copy_range_to(
        &self,
        target: &mut dyn Writable,
        begin: u64,
        max: Option<u64>,
        blocking: bool,
    ) -> Result<Transfer> {
        let mut skip = begin;
        let mut budget = max.unwrap_or(u64::MAX);
        let mut moved = 0u64;

        for (index, segment) in self.segments().enumerate() {
            if budget == 0 {
                break;
            }
            let len = segment.len() as u64;
            if skip >= len {
                skip -= len;
                continue;
            }
            let start = skip as usize;
            skip = 0;
            let end = start + usize::try_from(budget).map_or(segment.len() - start, |b| b.min(segment.len() - start));
            let sent = end - start;

            let blocked = match self.sealed.get(index) {
                Some(node) => target.push_bytes(node.slice(start..end), None, blocking)?,
                None => target.push(&segment[start..end], None, blocking)?,
            };
            moved += (sent - blocked) as u64;
            if blocked > 0 {
                return Ok(Transfer { moved, blocked });
            }
            budget -= sent as u64;
        }
        Ok(Transfer { moved, blocked: 0 })
    }

    fn peek_range(&self, offset: u64, out: &mut [u8]) -> usize {
        let mut skip = offset;
        let mut written = 0;
        for segment in self.segments() {
            if written == out.len() {
                break;
            }
            let len = segment.len() as u64;
            if skip >= len {
                skip -= len;
                continue;
            }
            let start = skip as usize;
            skip = 0;
            let n = (segment.len() - start).min(out.len() - written);
            out[written..written + n].copy_from_slice(&segment[start..start + n]);
            written += n;
        }
        written
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for Queue {
    fn from(data: &[u8]) -> Self {
        let mut queue = Self::new();
        queue.append(data);
        queue
    }
}

impl From<Vec<u8>> for Queue {
    fn from(data: Vec<u8>) -> Self {
        Self::from(Bytes::from(data))
    }
}

impl From<Bytes> for Queue {
    fn from(data: Bytes) -> Self {
        let mut queue = Self::new();
        queue.unget_bytes(data);
        queue
    }
}

impl Queue {
    fn append(&mut self, input: &[u8]) {
        let mut rest = input;
        while !rest.is_empty() {
            if self.tail.len() == self.tail.capacity() {
                self.seal_tail();
                self.tail = BytesMut::with_capacity(self.node_size);
            }
            let n = (self.tail.capacity() - self.tail.len()).min(rest.len());
            self.tail.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
        }
        self.size += input.len() as u64;
    }
}

impl Writable for Queue {
    fn push(&mut self, input: &[u8], _end: Option<Propagation>, _blocking: bool) -> Result<usize> {
        self.append(input);
        Ok(0)
    }

    fn push_bytes(&mut self, input: Bytes, _end: Option<Propagation>, _blocking: bool) -> Result<usize> {
        if !input.is_empty() {
            self.seal_tail();
            self.size += input.len() as u64;
            self.sealed.push_back(input);
        }
        Ok(0)
    }
}

impl Readable for Queue {
    fn max_retrievable(&self) -> u64 {
        self.size
    }

    fn pull(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < out.len() {
            let chunk = self.pull_chunk(out.len() - written);
            if chunk.is_empty() {
                break;
            }
            out[written..written + chunk.len()].copy_from_slice(&chunk);
            written += chunk.len();
        }
        Ok(written)
    }

    fn peek_at(&self, offset: u64, out: &mut [u8]) -> Result<usize> {
        Ok(self.peek_range(offset, out))
    }

    fn skip(&mut self, count: u64) -> Result<u64> {
        let mut skipped = 0u64;
        while skipped < count {
            let want = usize::try_from(count - skipped).unwrap_or(usize::MAX);
            let chunk = self.pull_chunk(want);
            if chunk.is_empty() {
                break;
            }
            skipped += chunk.len() as u64;
        }
        Ok(skipped)
    }

    fn transfer_to(
        &mut self,
        target: &mut dyn Writable,
        max: Option<u64>,
        blocking: bool,
    ) -> Result<Transfer> {
        let limit = max.unwrap_or(u64::MAX);
        let mut moved = 0u64;
        while moved < limit && !self.is_empty() {
            let want = usize::try_from(limit - moved).unwrap_or(usize::MAX);
            let chunk = self.pull_chunk(want);
            let len = chunk.len();
            let blocked = match target.push_bytes(chunk.clone(), None, blocking) {
                Ok(blocked) => blocked,
                Err(err) => {
                    self.unget_bytes(chunk);
                    return Err(err);
                }
            };
            moved += (len - blocked) as u64;
            if blocked > 0 {
                self.unget_bytes(chunk.slice(len - blocked..));
                return Ok(Transfer { moved, blocked });
            }
        }
        Ok(Transfer { moved, blocked: 0 })
    }

    fn copy_to(&self, target: &mut dyn Writable, max: Option<u64>, blocking: bool) -> Result<Transfer> {
        self.copy_range_to(target, 0, max, blocking)
    }
}

impl Stage for Queue {
    fn name(&self) -> &'static str {
        "Queue"
    }

    fn as_readable(&self) -> Option<&dyn Readable> {
        Some(self)
    }

    fn as_readable_mut(&mut self) -> Option<&mut dyn Readable> {
        Some(self)
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self
                .segments()
                .flatten()
                .eq(other.segments().flatten())
    }
}

impl Eq for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("size", &self.size)
            .field("nodes", &self.node_count())
            .field("node_size", &self.node_size)
            .finish()
    }
}

/// A non-destructive read cursor over a [`Queue`].
///
/// The walker borrows the queue, so the queue cannot be pulled from while a
/// walker is alive.
#[derive(Debug, Clone)]
pub struct Walker<'q> {
    queue: &'q Queue,
    position: u64,
}

impl Walker<'_> {
    /// Bytes the walker has advanced past.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left ahead of the walker.
    pub fn remaining(&self) -> u64 {
        self.queue.size - self.position
    }
}

impl Readable for Walker<'_> {
    fn max_retrievable(&self) -> u64 {
        self.remaining()
    }

    fn pull(&mut self, out: &mut [u8]) -> Result<usize> {
        let got = self.queue.peek_range(self.position, out);
        self.position += got as u64;
        Ok(got)
    }

    fn peek_at(&self, offset: u64, out: &mut [u8]) -> Result<usize> {
        Ok(self.queue.peek_range(self.position + offset, out))
    }

    fn skip(&mut self, count: u64) -> Result<u64> {
        let skipped = count.min(self.max_retrievable());
        self.position += skipped;
        Ok(skipped)
    }

    fn transfer_to(
        &mut self,
        target: &mut dyn Writable,
        max: Option<u64>,
        blocking: bool,
    ) -> Result<Transfer> {
        let sent = self.queue.copy_range_to(target, self.position, max, blocking)?;
        self.position += sent.moved;
        Ok(sent)
    }

    fn copy_to(&self, target: &mut dyn Writable, max: Option<u64>, blocking: bool) -> Result<Transfer> {
        self.queue.copy_range_to(target, self.position, max, blocking)
    }
}
