use bytes::Bytes;
use tracing::debug;

use crate::codec::{FragmentConfig, Frame, SEQUENCE_MASK};
use crate::command::FRAMING_BIT;
use crate::error::{FrameError, Result};

/// Splits one message into link-sized frames.
///
/// Yields the init frame first, then continuation frames with sequence
/// numbers counting up from 0 and wrapping at 128. The iterator doubles as
/// the outgoing cursor of an exchange: frames are pulled one at a time as
/// earlier writes are acknowledged.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    command: u8,
    payload: Bytes,
    offset: usize,
    sequence: u8,
    started: bool,
    config: FragmentConfig,
}

impl Fragmenter {
    /// Prepare `payload` for sending as `command` with the given MTU.
    pub fn new(command: u8, payload: impl Into<Bytes>, mtu: usize) -> Result<Self> {
        Self::with_config(
            command,
            payload,
            FragmentConfig {
                mtu,
                ..FragmentConfig::default()
            },
        )
    }

    /// Prepare `payload` for sending with explicit configuration.
    pub fn with_config(
        command: u8,
        payload: impl Into<Bytes>,
        config: FragmentConfig,
    ) -> Result<Self> {
        let payload = payload.into();
        let max = config.max_message_size.min(u16::MAX as usize);
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        debug!(
            command,
            len = payload.len(),
            mtu = config.mtu,
            frames = config.frame_count(payload.len()),
            "fragmenting message"
        );

        Ok(Self {
            command: command & !FRAMING_BIT,
            payload,
            offset: 0,
            sequence: 0,
            started: false,
            config,
        })
    }

    /// True once every frame has been yielded.
    pub fn is_finished(&self) -> bool {
        self.started && self.offset >= self.payload.len()
    }

    /// Frames not yet yielded.
    pub fn remaining_frames(&self) -> usize {
        if !self.started {
            return self.config.frame_count(self.payload.len());
        }
        (self.payload.len() - self.offset).div_ceil(self.config.cont_chunk())
    }

    /// Total number of frames this message needs.
    pub fn frame_count(&self) -> usize {
        self.config.frame_count(self.payload.len())
    }

    fn next_init(&mut self) -> Bytes {
        let take = self.config.init_chunk().min(self.payload.len());
        let frame = Frame::Init {
            command: self.command,
            // Length fits: checked against u16::MAX in the constructor.
            total_length: self.payload.len() as u16,
            payload: self.payload.slice(..take),
        };

        self.started = true;
        self.offset = take;
        frame.to_bytes()
    }

    fn next_continuation(&mut self) -> Bytes {
        let take = self.config.cont_chunk().min(self.payload.len() - self.offset);
        let frame = Frame::Continuation {
            sequence: self.sequence,
            payload: self.payload.slice(self.offset..self.offset + take),
        };

        self.sequence = self.sequence.wrapping_add(1) & SEQUENCE_MASK;
        self.offset += take;
        frame.to_bytes()
    }
}

impl Iterator for Fragmenter {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if !self.started {
            return Some(self.next_init());
        }
        if self.offset >= self.payload.len() {
            return None;
        }
        Some(self.next_continuation())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining_frames();
        (n, Some(n))
    }
}

/// Split `payload` into wire frames for `command` in one call.
pub fn fragment(command: u8, payload: &[u8], mtu: usize) -> Result<Vec<Bytes>> {
    Ok(Fragmenter::new(command, Bytes::copy_from_slice(payload), mtu)?.collect())
}
