/// Errors that can occur while splitting or rejoining frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A zero-length frame was received.
    #[error("empty frame")]
    EmptyFrame,

    /// An init frame is too short to hold its header.
    #[error("init frame too short ({len} bytes, need {need})")]
    TruncatedInit { len: usize, need: usize },

    /// A continuation frame arrived before any init frame.
    #[error("continuation frame (sequence {sequence}) before init frame")]
    UnexpectedContinuation { sequence: u8 },

    /// An init frame arrived while a message was still being assembled.
    #[error("init frame (command {command:#04x}) while {received} of {declared} bytes pending")]
    UnexpectedInit {
        command: u8,
        received: usize,
        declared: usize,
    },

    /// A continuation frame skipped or repeated a sequence number.
    #[error("out-of-sequence continuation (expected {expected}, got {got})")]
    OutOfSequence { expected: u8, got: u8 },

    /// More bytes arrived than the init frame declared.
    #[error("received {received} bytes, declared total is {declared}")]
    Overrun { received: usize, declared: usize },

    /// The message exceeds the configured or encodable maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
