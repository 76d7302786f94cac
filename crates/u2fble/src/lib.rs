//! FIDO U2F over Bluetooth Low Energy.
//!
//! u2fble builds U2F raw messages, carries them over a write/notify GATT
//! link in MTU-sized frames, and runs one exchange at a time per device.
//! Discovery, pairing and signature verification are left to the caller.
//!
//! # Crate Structure
//!
//! - [`transport`]: device boundary and link events
//! - [`frame`]: fragmentation and reassembly
//! - [`protocol`]: `ProtocolMessage` and the APDU codec
//! - [`session`]: the per-device exchange state machine

/// Re-export transport types.
pub mod transport {
    pub use u2fble_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use u2fble_frame::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use u2fble_protocol::*;
}

/// Re-export session types.
pub mod session {
    pub use u2fble_session::*;
}

pub use u2fble_protocol::{AuthControl, Operation, ProtocolMessage, StatusWord};
pub use u2fble_session::{exchange, Completion, ExchangeOutcome, ExchangeSession};
pub use u2fble_transport::{DeviceHandle, LinkEvent};
