use bytes::{BufMut, Bytes, BytesMut};

use crate::command::{is_init, FRAMING_BIT};
use crate::error::{FrameError, Result};

/// Init frame header: command (1) + total length (2) = 3 bytes.
pub const INIT_HEADER_SIZE: usize = 3;

/// Continuation frame header: sequence (1) = 1 byte.
pub const CONT_HEADER_SIZE: usize = 1;

/// Largest message the 16-bit length field can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Default link MTU: the 20-byte payload of a minimum-size ATT write.
pub const DEFAULT_MTU: usize = 20;

/// Sequence numbers wrap within 7 bits.
pub(crate) const SEQUENCE_MASK: u8 = 0x7f;

/// One link-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// First frame of a message.
    Init {
        /// Command identifier, framing bit stripped.
        command: u8,
        /// Length of the whole message payload.
        total_length: u16,
        /// First payload chunk.
        payload: Bytes,
    },
    /// Any later frame of a message.
    Continuation {
        /// Sequence number, 0..=127.
        sequence: u8,
        /// Next payload chunk.
        payload: Bytes,
    },
}

impl Frame {
    /// Parse one raw frame as received from the link.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let first = *raw.first().ok_or(FrameError::EmptyFrame)?;

        if !is_init(first) {
            return Ok(Frame::Continuation {
                sequence: first,
                payload: Bytes::copy_from_slice(&raw[CONT_HEADER_SIZE..]),
            });
        }

        if raw.len() < INIT_HEADER_SIZE {
            return Err(FrameError::TruncatedInit {
                len: raw.len(),
                need: INIT_HEADER_SIZE,
            });
        }

        Ok(Frame::Init {
            command: first & !FRAMING_BIT,
            total_length: u16::from_be_bytes([raw[1], raw[2]]),
            payload: Bytes::copy_from_slice(&raw[INIT_HEADER_SIZE..]),
        })
    }

    /// Encode this frame into the wire format.
    ///
    /// Wire format:
    /// ```text
    /// init:          ┌──────────────┬──────────┬──────────┬──────────┐
    ///                │ CMD | 0x80   │ LEN hi   │ LEN lo   │ payload… │
    ///                └──────────────┴──────────┴──────────┴──────────┘
    /// continuation:  ┌──────────────┬──────────┐
    ///                │ SEQ 0..=127  │ payload… │
    ///                └──────────────┴──────────┘
    /// ```
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        match self {
            Frame::Init {
                command,
                total_length,
                payload,
            } => {
                dst.put_u8(command | FRAMING_BIT);
                dst.put_u16(*total_length);
                dst.put_slice(payload);
            }
            Frame::Continuation { sequence, payload } => {
                dst.put_u8(sequence & SEQUENCE_MASK);
                dst.put_slice(payload);
            }
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// The payload chunk carried by this frame.
    pub fn payload(&self) -> &Bytes {
        match self {
            Frame::Init { payload, .. } | Frame::Continuation { payload, .. } => payload,
        }
    }

    /// The total wire size of this frame (header + chunk).
    pub fn wire_size(&self) -> usize {
        match self {
            Frame::Init { payload, .. } => INIT_HEADER_SIZE + payload.len(),
            Frame::Continuation { payload, .. } => CONT_HEADER_SIZE + payload.len(),
        }
    }
}

/// Configuration for fragmentation and reassembly.
#[derive(Debug, Clone)]
pub struct FragmentConfig {
    /// Maximum frame size in bytes, header included. Default: 20.
    pub mtu: usize,
    /// Maximum message size accepted for sending or reassembly. Default: 65535.
    pub max_message_size: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl FragmentConfig {
    /// Payload bytes carried by an init frame.
    ///
    /// MTUs too small for a header still carry one byte per frame so
    /// fragmentation always makes progress.
    pub fn init_chunk(&self) -> usize {
        self.mtu.saturating_sub(INIT_HEADER_SIZE).max(1)
    }

    /// Payload bytes carried by a continuation frame.
    pub fn cont_chunk(&self) -> usize {
        self.mtu.saturating_sub(CONT_HEADER_SIZE).max(1)
    }

    /// Number of frames needed for a message of `len` bytes.
    pub fn frame_count(&self, len: usize) -> usize {
        let rest = len.saturating_sub(self.init_chunk());
        1 + rest.div_ceil(self.cont_chunk())
    }
}
