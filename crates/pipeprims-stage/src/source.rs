use bytes::Bytes;
use tracing::trace;

use crate::attachment::Attachment;
use crate::error::Result;
use crate::queue::Queue;
use crate::stage::{Attachable, BoxedStage, Propagation, Readable, Transfer};

/// Head of a chain: holds input and pumps it into its attachment.
///
/// A source rejects input, so it is [`Attachable`] but not a stage itself.
#[derive(Debug)]
pub struct Source {
    store: Queue,
    attachment: Attachment,
}

impl Source {
    pub fn new(data: impl Into<Bytes>, attachment: Option<BoxedStage>) -> Self {
        Self::from_queue(Queue::from(data.into()), attachment)
    }

    pub fn from_queue(store: Queue, attachment: Option<BoxedStage>) -> Self {
        Self {
            store,
            attachment: Attachment::new(attachment),
        }
    }

    /// Bytes not yet pumped.
    pub fn remaining(&self) -> u64 {
        self.store.size()
    }

    pub fn is_exhausted(&self) -> bool {
        self.store.is_empty()
    }

    /// Move up to `max` bytes (all when `None`) downstream.
    ///
    /// Unattached sources discard what they pump.
    pub fn pump(&mut self, max: Option<u64>, blocking: bool) -> Result<Transfer> {
        let sent = match self.attachment.get_mut() {
            Some(stage) => self.store.transfer_to(stage, max, blocking)?,
            None => Transfer {
                moved: self.store.skip(max.unwrap_or(u64::MAX))?,
                blocked: 0,
            },
        };
        trace!(moved = sent.moved, blocked = sent.blocked, "pumped source");
        Ok(sent)
    }

    /// Pump everything, then end the message through the whole chain.
    pub fn pump_all(&mut self) -> Result<()> {
        self.pump(None, true)?;
        self.attachment
            .output_message_end(Propagation::Unlimited, true)?;
        Ok(())
    }

    /// End the message series through the whole chain.
    pub fn pump_message_series_end(&mut self) -> Result<()> {
        self.attachment
            .output_series_end(Propagation::Unlimited, true)?;
        Ok(())
    }
}

impl Attachable for Source {
    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    fn attachment_mut(&mut self) -> &mut Attachment {
        &mut self.attachment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageQueue;
    use crate::stage::MessageReadable;

    #[test]
    fn pump_moves_bytes_in_steps() {
        let mut source = Source::new(&b"0123456789"[..], Some(Box::new(MessageQueue::new())));

        assert_eq!(source.pump(Some(4), true).unwrap().moved, 4);
        assert_eq!(source.remaining(), 6);
        source.pump_all().unwrap();
        assert!(source.is_exhausted());

        let sink = source
            .attachment_mut()
            .get_mut()
            .unwrap()
            .message_readable_mut()
            .unwrap();
        assert_eq!(sink.messages(), 1);
        assert_eq!(sink.max_retrievable(), 10);
    }

    #[test]
    fn unattached_source_discards() {
        let mut source = Source::new(&b"abc"[..], None);
        assert_eq!(source.pump(None, true).unwrap().moved, 3);
        assert!(source.is_exhausted());
    }

    #[test]
    fn attach_walks_to_end_of_chain() {
        let mut source = Source::new(&b"x"[..], None);
        assert!(source.attach(Box::new(MessageQueue::new())).is_none());

        // A terminal attachment is replaced and handed back.
        let old = source.attach(Box::new(MessageQueue::new())).unwrap();
        assert_eq!(old.name(), "MessageQueue");
        assert!(source.take_attachment().is_some());
    }
}
