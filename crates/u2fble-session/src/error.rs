use std::time::Duration;

use u2fble_frame::FrameError;
use u2fble_protocol::{ProtocolError, ProtocolMessage};
use u2fble_transport::TransportError;

/// Errors returned synchronously by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// An exchange is already pending on this device.
    #[error("device busy: an exchange is already pending")]
    Busy,

    /// The device is not bonded and the pairing policy requires it.
    #[error("device {0} is not paired")]
    NotPaired(String),

    /// The request could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The request could not be fragmented.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The exchange ended without delivering a completion.
    #[error("exchange abandoned before completion")]
    Abandoned,
}

/// A `start()` that was refused. The message is handed back untouched.
#[derive(Debug, thiserror::Error)]
#[error("exchange rejected: {error}")]
pub struct Rejected {
    #[source]
    pub error: SessionError,
    pub message: ProtocolMessage,
}

impl From<Rejected> for SessionError {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}

/// Why an accepted exchange did not produce a status word.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The response APDU did not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The notification frames did not reassemble.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The authenticator answered with an ERROR frame.
    #[error("device error code {0:#04x}")]
    Device(u8),

    /// A write or notification failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No response arrived within the response timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the exchange.
    #[error("exchange cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SessionError>;
