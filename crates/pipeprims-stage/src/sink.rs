use crate::error::Result;
use crate::stage::{ChannelWritable, Propagation, Stage, Writable};

/// Terminal stage that accepts and drops everything, on any channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Writable for Discard {
    fn push(&mut self, _input: &[u8], _end: Option<Propagation>, _blocking: bool) -> Result<usize> {
        Ok(0)
    }
}

impl ChannelWritable for Discard {
    fn channel_push(
        &mut self,
        _channel: &str,
        _input: &[u8],
        _end: Option<Propagation>,
        _blocking: bool,
    ) -> Result<usize> {
        Ok(0)
    }

    fn channel_message_series_end(
        &mut self,
        _channel: &str,
        _propagation: Propagation,
        _blocking: bool,
    ) -> Result<bool> {
        Ok(false)
    }
}

impl Stage for Discard {
    fn name(&self) -> &'static str {
        "Discard"
    }

    fn as_channel_writable_mut(&mut self) -> Option<&mut dyn ChannelWritable> {
        Some(self)
    }
}
