//! Fragmentation and reassembly of U2F messages over link-sized frames.
//!
//! A message is split into one init frame followed by continuation frames:
//! - Init: command byte tagged with the framing bit, 2-byte big-endian total
//!   length, first payload chunk
//! - Continuation: 7-bit wrapping sequence number, next payload chunk
//!
//! Chunk sizes follow the negotiated link MTU. Reassembly hands a message up
//! only once exactly the declared number of bytes has arrived.

pub mod codec;
pub mod command;
pub mod error;
pub mod fragment;
pub mod reassemble;

pub use codec::{
    Frame, FragmentConfig, CONT_HEADER_SIZE, DEFAULT_MTU, INIT_HEADER_SIZE, MAX_MESSAGE_SIZE,
};
pub use command::{CANCEL, ERROR, FRAMING_BIT, KEEPALIVE, MSG, PING};
pub use error::{FrameError, Result};
pub use fragment::{fragment, Fragmenter};
pub use reassemble::{Message, Reassembler};
