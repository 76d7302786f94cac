//! Frame command identifiers.
//!
//! Values are stored without the framing bit; the init frame carries
//! `command | FRAMING_BIT` on the wire.

/// High bit marking the first byte of an init frame.
pub const FRAMING_BIT: u8 = 0x80;

/// Echo request/response.
pub const PING: u8 = 0x01;

/// Authenticator is still working on the request.
pub const KEEPALIVE: u8 = 0x02;

/// Encapsulated U2F raw message (request or response APDU).
pub const MSG: u8 = 0x03;

/// Abort the outstanding request.
pub const CANCEL: u8 = 0x3e;

/// Link-level error; the first payload byte is the error code.
pub const ERROR: u8 = 0x3f;

/// Keepalive status: request is being processed.
pub const KEEPALIVE_PROCESSING: u8 = 0x01;

/// Keepalive status: waiting for user presence.
pub const KEEPALIVE_UP_NEEDED: u8 = 0x02;

/// Returns a human-readable name for a command identifier.
pub fn command_name(command: u8) -> &'static str {
    match command & !FRAMING_BIT {
        PING => "PING",
        KEEPALIVE => "KEEPALIVE",
        MSG => "MSG",
        CANCEL => "CANCEL",
        ERROR => "ERROR",
        _ => "UNKNOWN",
    }
}

/// Returns true if the first byte of a frame marks an init frame.
pub fn is_init(first_byte: u8) -> bool {
    first_byte & FRAMING_BIT != 0
}
