use crate::message::Operation;

/// Errors that can occur while building or decoding U2F messages.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Text at the boundary is not valid hexadecimal.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A fixed-size field was given the wrong number of bytes.
    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A variable-size field exceeds its maximum.
    #[error("{field} too long ({actual} bytes, max {max})")]
    TooLong {
        field: &'static str,
        actual: usize,
        max: usize,
    },

    /// A field required to encode the request has not been set.
    #[error("{0} not set")]
    MissingField(&'static str),

    /// The operation was already chosen.
    #[error("operation already set to {0}")]
    OperationAlreadySet(Operation),

    /// The field was already set.
    #[error("{0} already set")]
    FieldAlreadySet(&'static str),

    /// The field is not part of the chosen operation.
    #[error("{field} not allowed for {operation}")]
    FieldNotAllowed {
        field: &'static str,
        operation: Operation,
    },

    /// The response is shorter than the minimum structure of its operation.
    #[error("{operation} response too short ({len} bytes, need {need})")]
    Truncated {
        operation: Operation,
        len: usize,
        need: usize,
    },

    /// A length-prefixed or self-describing subfield runs past the response.
    #[error("{field} overruns response ({need} bytes needed, {available} available)")]
    Overrun {
        field: &'static str,
        need: usize,
        available: usize,
    },

    /// The REGISTER reserved byte has an unexpected value.
    #[error("unexpected reserved byte {0:#04x}")]
    ReservedByte(u8),

    /// The attestation certificate header is not a definite-length DER SEQUENCE.
    #[error("malformed certificate: {0}")]
    Certificate(&'static str),

    /// VERSION response text is not UTF-8.
    #[error("version text is not valid UTF-8")]
    VersionNotUtf8,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
