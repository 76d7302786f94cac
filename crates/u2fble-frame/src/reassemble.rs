use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::codec::{Frame, FragmentConfig, SEQUENCE_MASK};
use crate::error::{FrameError, Result};

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Command identifier from the init frame, framing bit stripped.
    pub command: u8,
    /// Message payload, exactly the declared length.
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for an init frame.
    Idle,
    /// Init frame seen, collecting continuations.
    Assembling {
        command: u8,
        declared: usize,
        next_sequence: u8,
    },
}

/// Rejoins notification frames into complete messages.
///
/// Frames are consumed in arrival order. Any sequencing violation discards
/// the partial message and resets to waiting for a new init frame.
pub struct Reassembler {
    buf: BytesMut,
    state: State,
    max_message_size: usize,
}

impl Reassembler {
    /// Create a reassembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(&FragmentConfig::default())
    }

    /// Create a reassembler with explicit configuration.
    pub fn with_config(config: &FragmentConfig) -> Self {
        Self {
            buf: BytesMut::new(),
            state: State::Idle,
            max_message_size: config.max_message_size,
        }
    }

    /// Feed one raw frame.
    ///
    /// Returns `Ok(Some(message))` when the frame completes a message and
    /// `Ok(None)` when more frames are needed.
    pub fn push(&mut self, raw: &[u8]) -> Result<Option<Message>> {
        let frame = Frame::parse(raw).inspect_err(|_| self.reset())?;
        self.push_frame(frame)
    }

    /// Feed one parsed frame.
    pub fn push_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        self.advance(frame).inspect_err(|_| self.reset())
    }

    fn advance(&mut self, frame: Frame) -> Result<Option<Message>> {
        match (self.state, frame) {
            (
                State::Idle,
                Frame::Init {
                    command,
                    total_length,
                    payload,
                },
            ) => {
                let declared = usize::from(total_length);
                if declared > self.max_message_size {
                    return Err(FrameError::PayloadTooLarge {
                        size: declared,
                        max: self.max_message_size,
                    });
                }
                self.buf.clear();
                self.buf.reserve(declared);
                self.state = State::Assembling {
                    command,
                    declared,
                    next_sequence: 0,
                };
                self.append(&payload)
            }
            (State::Idle, Frame::Continuation { sequence, .. }) => {
                Err(FrameError::UnexpectedContinuation { sequence })
            }
            (State::Assembling { declared, .. }, Frame::Init { command, .. }) => {
                Err(FrameError::UnexpectedInit {
                    command,
                    received: self.buf.len(),
                    declared,
                })
            }
            (
                State::Assembling {
                    command,
                    declared,
                    next_sequence,
                },
                Frame::Continuation { sequence, payload },
            ) => {
                if sequence != next_sequence {
                    return Err(FrameError::OutOfSequence {
                        expected: next_sequence,
                        got: sequence,
                    });
                }
                self.state = State::Assembling {
                    command,
                    declared,
                    next_sequence: next_sequence.wrapping_add(1) & SEQUENCE_MASK,
                };
                self.append(&payload)
            }
        }
    }

    /// Discard any partial message.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::Idle;
    }

    /// True while an init frame has been seen but the message is incomplete.
    pub fn is_assembling(&self) -> bool {
        matches!(self.state, State::Assembling { .. })
    }

    /// Bytes collected so far for the current message.
    pub fn received(&self) -> usize {
        self.buf.len()
    }

    fn append(&mut self, chunk: &[u8]) -> Result<Option<Message>> {
        let State::Assembling {
            command, declared, ..
        } = self.state
        else {
            return Ok(None);
        };

        let received = self.buf.len() + chunk.len();
        if received > declared {
            return Err(FrameError::Overrun { received, declared });
        }
        self.buf.extend_from_slice(chunk);

        if received < declared {
            return Ok(None);
        }

        debug!(command, len = declared, "message reassembled");
        self.state = State::Idle;
        Ok(Some(Message {
            command,
            payload: self.buf.split().freeze(),
        }))
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
