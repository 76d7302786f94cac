use std::fmt;

use u2fble_frame::FrameError;
use u2fble_protocol::ProtocolError;

pub const SUCCESS: i32 = 0;
/// The command ran but the device status was not success.
pub const FAILURE: i32 = 1;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

pub fn protocol_error(context: &str, err: ProtocolError) -> CliError {
    let code = match err {
        ProtocolError::OperationAlreadySet(_)
        | ProtocolError::FieldAlreadySet(_)
        | ProtocolError::FieldNotAllowed { .. }
        | ProtocolError::MissingField(_) => USAGE,
        _ => DATA_INVALID,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    let code = match err {
        FrameError::PayloadTooLarge { .. } => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
