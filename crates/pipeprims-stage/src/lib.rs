//! Composable byte-stream stages.
//!
//! This is the lowest layer of pipeprims. A pipeline is a chain of stages:
//! - Every stage accepts bytes and message boundaries ([`Writable`])
//! - Buffering stages can be read from ([`Readable`], [`MessageReadable`])
//! - Filters own the next stage through an [`Attachment`]
//!
//! Pushes are either blocking or non-blocking. A non-blocking push returns
//! the number of bytes the chain did not accept, and the caller repeats the
//! same push until that number is zero.

pub mod attachment;
pub mod channel;
pub mod error;
pub mod filter;
pub mod message;
pub mod queue;
pub mod sink;
pub mod source;
pub mod stage;

pub use attachment::Attachment;
pub use channel::{ChannelSwitch, DestinationId, SwitchConfig, DEFAULT_CHANNEL};
pub use error::{Result, StageError};
pub use filter::{Transform, TransformFilter};
pub use message::MessageQueue;
pub use queue::{Queue, QueueConfig, Walker, DEFAULT_NODE_SIZE};
pub use sink::Discard;
pub use source::Source;
pub use stage::{
    Attachable, BoxedStage, ChannelWritable, MessageReadable, Propagation, Readable, Stage,
    Transfer, Writable,
};
