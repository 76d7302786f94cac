/// Errors that can occur on the device link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A frame write could not be issued or was not acknowledged.
    #[error("write to {address} failed: {reason}")]
    Write { address: String, reason: String },

    /// The notification characteristic reported a failure.
    #[error("notification from {address} failed: {reason}")]
    Notify { address: String, reason: String },

    /// The device dropped the connection.
    #[error("device {0} disconnected")]
    Disconnected(String),

    /// The link event channel was closed while an exchange was pending.
    #[error("link event channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
