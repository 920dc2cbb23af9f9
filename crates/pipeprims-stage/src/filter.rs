use bytes::BytesMut;

use crate::attachment::Attachment;
use crate::error::Result;
use crate::queue::Queue;
use crate::stage::{
    Attachable, BoxedStage, MessageReadable, Propagation, Readable, Stage, Writable,
};

/// A byte transformation step, such as a cipher or an encoder.
pub trait Transform {
    /// Process `input`, appending produced bytes to `output`.
    fn process(&mut self, input: &[u8], output: &mut BytesMut);

    /// Called at a message end to emit any trailing output.
    fn finish(&mut self, _output: &mut BytesMut) {}
}

impl<F> Transform for F
where
    F: FnMut(&[u8], &mut BytesMut),
{
    fn process(&mut self, input: &[u8], output: &mut BytesMut) {
        self(input, output)
    }
}

/// A filter that runs every pushed byte through a [`Transform`] and forwards
/// the result to its attachment.
///
/// In non-blocking mode undelivered output is held back and the call reports
/// how many output bytes are still pending. Repeating the same push resumes
/// delivery without processing the input a second time.
pub struct TransformFilter<T> {
    transform: T,
    attachment: Attachment,
    pending: Queue,
    pending_end: Option<Propagation>,
    resuming: bool,
}

impl<T: Transform> TransformFilter<T> {
    pub fn new(transform: T, attachment: Option<BoxedStage>) -> Self {
        Self {
            transform,
            attachment: Attachment::new(attachment),
            pending: Queue::new(),
            pending_end: None,
            resuming: false,
        }
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Output produced but not yet accepted downstream.
    pub fn pending(&self) -> u64 {
        self.pending.size()
    }

    fn deliver(&mut self, blocking: bool) -> Result<usize> {
        let Some(next) = self.attachment.get_mut() else {
            self.pending.clear();
            self.pending_end = None;
            return Ok(0);
        };
        let sent = self.pending.transfer_to(next, None, blocking)?;
        if !sent.is_complete() {
            return Ok(sent.blocked);
        }
        if let Some(end) = self.pending_end {
            if next.signal_message_end(end, blocking)? {
                return Ok(1);
            }
            self.pending_end = None;
        }
        Ok(0)
    }
}

impl<T: Transform> Writable for TransformFilter<T> {
    fn push(&mut self, input: &[u8], end: Option<Propagation>, blocking: bool) -> Result<usize> {
        if !self.resuming {
            let mut output = BytesMut::new();
            self.transform.process(input, &mut output);
            if end.is_some() {
                self.transform.finish(&mut output);
            }
            self.pending.push_bytes(output.freeze(), None, true)?;
            self.pending_end = end.and_then(Propagation::next);
            self.resuming = true;
        }
        let blocked = self.deliver(blocking)?;
        if blocked == 0 {
            self.resuming = false;
        }
        Ok(blocked)
    }

    fn isolated_flush(&mut self, _hard: bool, blocking: bool) -> Result<bool> {
        let blocked = self.deliver(blocking)?;
        if blocked == 0 {
            self.resuming = false;
        }
        Ok(blocked > 0)
    }
}

impl<T: Transform> Attachable for TransformFilter<T> {
    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    fn attachment_mut(&mut self) -> &mut Attachment {
        &mut self.attachment
    }
}

impl<T: Transform> Stage for TransformFilter<T> {
    fn name(&self) -> &'static str {
        "TransformFilter"
    }

    fn as_readable(&self) -> Option<&dyn Readable> {
        self.attachment.get()?.as_readable()
    }

    fn as_readable_mut(&mut self) -> Option<&mut dyn Readable> {
        self.attachment.get_mut()?.as_readable_mut()
    }

    fn as_message_readable(&self) -> Option<&dyn MessageReadable> {
        self.attachment.get()?.as_message_readable()
    }

    fn as_message_readable_mut(&mut self) -> Option<&mut dyn MessageReadable> {
        self.attachment.get_mut()?.as_message_readable_mut()
    }

    fn as_attachable(&self) -> Option<&dyn Attachable> {
        Some(self)
    }

    fn as_attachable_mut(&mut self) -> Option<&mut dyn Attachable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageQueue;
    use crate::StageError;

    fn xor(key: u8) -> impl FnMut(&[u8], &mut BytesMut) {
        move |input: &[u8], output: &mut BytesMut| {
            output.extend(input.iter().map(|b| b ^ key));
        }
    }

    /// Accepts a limited number of bytes per non-blocking push.
    struct Trickle {
        inner: MessageQueue,
        credit: usize,
    }

    impl Writable for Trickle {
        fn push(&mut self, input: &[u8], end: Option<Propagation>, blocking: bool) -> Result<usize> {
            let take = if blocking { input.len() } else { input.len().min(self.credit) };
            let fully = take == input.len();
            self.inner
                .push(&input[..take], if fully { end } else { None }, blocking)?;
            Ok(input.len() - take)
        }
    }

    impl Stage for Trickle {
        fn name(&self) -> &'static str {
            "Trickle"
        }

        fn as_message_readable_mut(&mut self) -> Option<&mut dyn MessageReadable> {
            Some(&mut self.inner)
        }
    }

    #[test]
    fn forwards_transformed_bytes() {
        let mut filter = TransformFilter::new(xor(0xFF), Some(Box::new(MessageQueue::new())));
        filter.put_message(&[0x00, 0x0F]).unwrap();

        let out = filter.message_readable_mut().unwrap();
        assert_eq!(out.messages(), 1);
        let mut buf = [0u8; 2];
        out.pull(&mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xF0]);
    }

    #[test]
    fn finish_runs_at_message_end() {
        struct Counter(usize);
        impl Transform for Counter {
            fn process(&mut self, input: &[u8], _output: &mut BytesMut) {
                self.0 += input.len();
            }
            fn finish(&mut self, output: &mut BytesMut) {
                output.extend_from_slice(self.0.to_string().as_bytes());
            }
        }

        let mut filter = TransformFilter::new(Counter(0), Some(Box::new(MessageQueue::new())));
        filter.put(b"abc").unwrap();
        filter.put_message(b"de").unwrap();

        let out = filter.readable_mut().unwrap();
        let mut buf = [0u8; 8];
        let n = out.pull(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"5");
    }

    #[test]
    fn non_blocking_push_resumes_without_reprocessing() {
        let sink = Trickle {
            inner: MessageQueue::new(),
            credit: 2,
        };
        let mut calls = 0usize;
        let mut filter = TransformFilter::new(
            |input: &[u8], output: &mut BytesMut| {
                calls += 1;
                output.extend_from_slice(input);
            },
            Some(Box::new(sink)),
        );

        let input = b"abcdef";
        let end = Some(Propagation::Unlimited);
        let mut blocked = filter.push(input, end, false).unwrap();
        assert_eq!(blocked, 4);
        assert_eq!(filter.pending(), 4);

        blocked = filter.push(input, end, false).unwrap();
        assert_eq!(blocked, 2);
        blocked = filter.push(input, end, false).unwrap();
        assert_eq!(blocked, 0);

        let out = filter.message_readable_mut().unwrap();
        assert_eq!(out.messages(), 1);
        assert_eq!(out.max_retrievable(), 6);
        drop(filter);
        assert_eq!(calls, 1);
    }

    #[test]
    fn unattached_filter_reports_missing_capability() {
        let mut filter = TransformFilter::new(xor(1), None);
        filter.put(b"dropped").unwrap();
        assert_eq!(filter.pending(), 0);
        assert!(matches!(
            filter.readable_mut(),
            Err(StageError::Unsupported {
                stage: "TransformFilter",
                ..
            })
        ));
    }
}
