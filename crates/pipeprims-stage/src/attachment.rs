use std::fmt;

use bytes::Bytes;

use crate::channel::DEFAULT_CHANNEL;
use crate::error::Result;
use crate::stage::{BoxedStage, Propagation, Stage};

/// The owned, nullable downstream handle of a filter.
///
/// Ownership moves explicitly: [`Attachment::take`] and [`Attachment::replace`]
/// hand the previous chain back to the caller. Output sent while unattached is
/// discarded.
#[derive(Default)]
pub struct Attachment {
    next: Option<BoxedStage>,
}

impl Attachment {
    pub fn new(next: Option<BoxedStage>) -> Self {
        Self { next }
    }

    pub fn is_attached(&self) -> bool {
        self.next.is_some()
    }

    pub fn get(&self) -> Option<&(dyn Stage + 'static)> {
        self.next.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut (dyn Stage + 'static)> {
        self.next.as_deref_mut()
    }

    pub fn take(&mut self) -> Option<BoxedStage> {
        self.next.take()
    }

    pub fn replace(&mut self, next: Option<BoxedStage>) -> Option<BoxedStage> {
        std::mem::replace(&mut self.next, next)
    }

    /// Forward `input` downstream. `end` is the propagation this hop received.
    pub fn output(&mut self, input: &[u8], end: Option<Propagation>, blocking: bool) -> Result<usize> {
        match self.next.as_deref_mut() {
            Some(stage) => stage.push(input, end.and_then(Propagation::next), blocking),
            None => Ok(0),
        }
    }

    pub fn output_bytes(&mut self, input: Bytes, end: Option<Propagation>, blocking: bool) -> Result<usize> {
        match self.next.as_deref_mut() {
            Some(stage) => stage.push_bytes(input, end.and_then(Propagation::next), blocking),
            None => Ok(0),
        }
    }

    /// Forward `input` to a named channel of the attachment.
    pub fn output_channel(
        &mut self,
        channel: &str,
        input: &[u8],
        end: Option<Propagation>,
        blocking: bool,
    ) -> Result<usize> {
        let end = end.and_then(Propagation::next);
        match self.next.as_deref_mut() {
            Some(stage) if channel == DEFAULT_CHANNEL => stage.push(input, end, blocking),
            Some(stage) => stage
                .channel_writable_mut()?
                .channel_push(channel, input, end, blocking),
            None => Ok(0),
        }
    }

    /// Start a message end at the attachment with the given propagation.
    pub fn output_message_end(&mut self, propagation: Propagation, blocking: bool) -> Result<bool> {
        match self.next.as_deref_mut() {
            Some(stage) => stage.signal_message_end(propagation, blocking),
            None => Ok(false),
        }
    }

    /// Start a series end at the attachment with the given propagation.
    pub fn output_series_end(&mut self, propagation: Propagation, blocking: bool) -> Result<bool> {
        match self.next.as_deref_mut() {
            Some(stage) => stage.signal_message_series_end(propagation, blocking),
            None => Ok(false),
        }
    }

    /// Flush the attachment with the given propagation.
    pub fn output_flush(&mut self, hard: bool, propagation: Propagation, blocking: bool) -> Result<bool> {
        match self.next.as_deref_mut() {
            Some(stage) => stage.flush(hard, propagation, blocking),
            None => Ok(false),
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("next", &self.next.as_deref().map(|stage| stage.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageQueue;
    use crate::stage::MessageReadable;

    #[test]
    fn unattached_output_is_discarded() {
        let mut attachment = Attachment::default();
        assert!(!attachment.is_attached());
        assert_eq!(attachment.output(b"dropped", None, true).unwrap(), 0);
        assert!(!attachment.output_message_end(Propagation::Unlimited, true).unwrap());
    }

    #[test]
    fn output_decrements_message_end_propagation() {
        let mut attachment = Attachment::new(Some(Box::new(MessageQueue::new())));

        attachment.output(b"one", Some(Propagation::LOCAL), true).unwrap();
        attachment.output(b"two", Some(Propagation::Hops(1)), true).unwrap();

        let queue = attachment.get_mut().unwrap().message_readable_mut().unwrap();
        assert_eq!(queue.messages(), 1);
        assert_eq!(queue.max_retrievable(), 6);
    }

    #[test]
    fn replace_returns_previous_chain() {
        let mut attachment = Attachment::new(Some(Box::new(MessageQueue::new())));
        let old = attachment.replace(None).unwrap();
        assert_eq!(old.name(), "MessageQueue");
        assert!(attachment.take().is_none());
    }

    #[test]
    fn channel_output_requires_channel_capability() {
        let mut attachment = Attachment::new(Some(Box::new(MessageQueue::new())));
        let err = attachment
            .output_channel("side", b"x", None, true)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::StageError::Unsupported {
                stage: "MessageQueue",
                ..
            }
        ));
    }
}
