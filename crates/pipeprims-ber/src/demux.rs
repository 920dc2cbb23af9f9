//! Splitting a stream of concatenated BER values into messages.
//!
//! The parse is a pure state machine ([`DemuxState::advance`]) driven by the
//! [`Demux`] filter, which buffers input until a transition can be made. Input
//! may be split anywhere, down to single bytes.

use pipeprims_stage::{
    Attachable, Attachment, BoxedStage, MessageReadable, Propagation, Queue, Readable, Stage,
    StageError, Writable,
};
use tracing::{debug, trace};

use crate::error::{BerError, Result};
use crate::length::{parse_length, Length};
use crate::tag::Tag;

/// Bytes the state machine may need to see at once: the longest possible
/// length field.
pub const WINDOW: usize = 1 + 127;

/// Configuration for a [`Demux`].
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Forward the bytes of each value. When false they are dropped and
    /// only the boundary signals reach the attachment.
    pub forward_objects: bool,
    /// End a message after every top-level value. Default: true.
    pub message_end_after_each: bool,
    /// End a message once `max_objects` values have been seen.
    pub message_end_after_all: bool,
    /// End the message series once `max_objects` values have been seen.
    pub series_end_after_all: bool,
    /// Stop parsing after this many values and pass the rest through.
    /// `None` parses the whole stream.
    pub max_objects: Option<u64>,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            forward_objects: true,
            message_end_after_each: true,
            message_end_after_all: false,
            series_end_after_all: false,
            max_objects: None,
        }
    }
}

/// Where the parser is within the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for an identifier octet or an end-of-contents marker.
    Identifier,
    /// Identifier read, waiting for the length field.
    Length { id: Tag },
    /// Inside primitive or definite-length content.
    Body { remaining: usize },
    /// The value limit was reached; everything else passes through.
    Passthrough,
}

/// The complete parse state between two pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxState {
    pub phase: Phase,
    /// Open indefinite-length values.
    pub level: usize,
    /// Top-level values completed so far.
    pub objects: u64,
}

/// One step of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: DemuxState,
    /// Input bytes the step used up.
    pub consumed: usize,
    /// True when the step finished a top-level value.
    pub completed: bool,
}

impl Default for DemuxState {
    fn default() -> Self {
        Self {
            phase: Phase::Identifier,
            level: 0,
            objects: 0,
        }
    }
}

impl DemuxState {
    /// The state before any input, which is already pass-through when no
    /// values are to be parsed.
    pub fn starting(max_objects: Option<u64>) -> Self {
        let phase = if max_objects == Some(0) {
            Phase::Passthrough
        } else {
            Phase::Identifier
        };
        Self {
            phase,
            ..Self::default()
        }
    }

    /// Make one transition.
    ///
    /// `window` is the start of the buffered input and `available` the total
    /// number of buffered bytes. Returns `Ok(None)` when more input is needed.
    pub fn advance(
        self,
        window: &[u8],
        available: u64,
        max_objects: Option<u64>,
    ) -> Result<Option<Transition>> {
        match self.phase {
            Phase::Identifier => {
                let Some(&octet) = window.first() else {
                    return Ok(None);
                };
                if octet == Tag::END_OF_CONTENTS.octet() {
                    if self.level == 0 {
                        return Err(BerError::UnexpectedEndOfContents);
                    }
                    let Some(&second) = window.get(1) else {
                        return Ok(None);
                    };
                    if second != 0x00 {
                        return Err(BerError::UnexpectedEndOfContents);
                    }
                    let level = self.level - 1;
                    return Ok(Some(self.value_done(level, 2, max_objects)));
                }
                let id = Tag::from_octet(octet)?;
                Ok(Some(self.step(Phase::Length { id }, 1)))
            }
            Phase::Length { id } => match parse_length(window)? {
                None => Ok(None),
                Some((Length::Indefinite, _)) if !id.is_constructed() => {
                    Err(BerError::IndefinitePrimitive)
                }
                Some((Length::Indefinite, used)) => Ok(Some(Transition {
                    next: DemuxState {
                        phase: Phase::Identifier,
                        level: self.level + 1,
                        ..self
                    },
                    consumed: used,
                    completed: false,
                })),
                Some((Length::Definite(0), used)) => {
                    Ok(Some(self.value_done(self.level, used, max_objects)))
                }
                Some((Length::Definite(remaining), used)) => {
                    Ok(Some(self.step(Phase::Body { remaining }, used)))
                }
            },
            Phase::Body { remaining } => {
                if available == 0 {
                    return Ok(None);
                }
                let take = usize::try_from(available).map_or(remaining, |n| n.min(remaining));
                if take == remaining {
                    Ok(Some(self.value_done(self.level, take, max_objects)))
                } else {
                    Ok(Some(self.step(
                        Phase::Body {
                            remaining: remaining - take,
                        },
                        take,
                    )))
                }
            }
            Phase::Passthrough => {
                if available == 0 {
                    return Ok(None);
                }
                let take = usize::try_from(available).unwrap_or(usize::MAX);
                Ok(Some(self.step(Phase::Passthrough, take)))
            }
        }
    }

    fn step(self, phase: Phase, consumed: usize) -> Transition {
        Transition {
            next: DemuxState { phase, ..self },
            consumed,
            completed: false,
        }
    }

    // A value ended; at level 0 that was a whole top-level value.
    fn value_done(self, level: usize, consumed: usize, max_objects: Option<u64>) -> Transition {
        if level > 0 {
            return Transition {
                next: DemuxState {
                    phase: Phase::Identifier,
                    level,
                    ..self
                },
                consumed,
                completed: false,
            };
        }
        let objects = self.objects + 1;
        let phase = if max_objects == Some(objects) {
            Phase::Passthrough
        } else {
            Phase::Identifier
        };
        Transition {
            next: DemuxState {
                phase,
                level,
                objects,
            },
            consumed,
            completed: true,
        }
    }
}

/// A filter that splits concatenated top-level BER values into messages.
///
/// Only blocking input is accepted. Partial values are held in an internal
/// queue until the rest arrives, so values of any size stream through.
pub struct Demux {
    config: DemuxConfig,
    state: DemuxState,
    pending: Queue,
    attachment: Attachment,
}

impl Demux {
    pub fn new(config: DemuxConfig, attachment: Option<BoxedStage>) -> Self {
        Self {
            state: DemuxState::starting(config.max_objects),
            config,
            pending: Queue::new(),
            attachment: Attachment::new(attachment),
        }
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Top-level values completed so far.
    pub fn objects(&self) -> u64 {
        self.state.objects
    }

    fn fail(&self, err: BerError) -> StageError {
        debug!(state = ?self.state, error = %err, "demux parse failed");
        match err {
            BerError::Stage(inner) => inner,
            other => StageError::Filter {
                stage: "Demux",
                source: Box::new(other),
            },
        }
    }

    fn forward(&mut self, count: usize, passthrough: bool) -> pipeprims_stage::Result<()> {
        let keep = passthrough || self.config.forward_objects;
        match self.attachment.get_mut() {
            Some(next) if keep => {
                self.pending.transfer_to(next, Some(count as u64), true)?;
            }
            _ => {
                self.pending.skip(count as u64)?;
            }
        }
        Ok(())
    }

    fn value_completed(&mut self) -> pipeprims_stage::Result<()> {
        trace!(objects = self.state.objects, "top-level value complete");
        if self.config.message_end_after_each {
            self.attachment
                .output_message_end(Propagation::Unlimited, true)?;
        }
        if self.state.phase == Phase::Passthrough {
            if self.config.message_end_after_all {
                self.attachment
                    .output_message_end(Propagation::Unlimited, true)?;
            }
            if self.config.series_end_after_all {
                self.attachment
                    .output_series_end(Propagation::Unlimited, true)?;
            }
        }
        Ok(())
    }
}

impl Writable for Demux {
    fn push(
        &mut self,
        input: &[u8],
        end: Option<Propagation>,
        blocking: bool,
    ) -> pipeprims_stage::Result<usize> {
        if !blocking {
            return Err(StageError::BlockingInputOnly { stage: "Demux" });
        }
        self.pending.push(input, None, true)?;

        let mut window = [0u8; WINDOW];
        loop {
            let seen = self.pending.peek(&mut window)?;
            let step = self
                .state
                .advance(&window[..seen], self.pending.size(), self.config.max_objects)
                .map_err(|err| self.fail(err))?;
            let Some(step) = step else {
                break;
            };
            let passthrough = self.state.phase == Phase::Passthrough;
            self.forward(step.consumed, passthrough)?;
            self.state = step.next;
            if step.completed {
                self.value_completed()?;
            }
        }

        if end.is_some() {
            self.attachment.output(&[], end, true)?;
        }
        Ok(0)
    }
}

impl Attachable for Demux {
    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    fn attachment_mut(&mut self) -> &mut Attachment {
        &mut self.attachment
    }
}

impl Stage for Demux {
    fn name(&self) -> &'static str {
        "Demux"
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
