use clap::{Args, Subcommand, ValueEnum};
use u2fble_frame::{KEEPALIVE, MSG, PING};
use u2fble_protocol::{AuthControl, Operation};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod apdu;
pub mod decode;
pub mod frames;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode a request APDU.
    Apdu(ApduArgs),
    /// Split a hex message into link frames.
    Frames(FramesArgs),
    /// Decode a hex response APDU.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Apdu(args) => apdu::run(args, format),
        Command::Frames(args) => frames::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ApduArgs {
    #[command(subcommand)]
    pub command: ApduCommand,
}

#[derive(Subcommand, Debug)]
pub enum ApduCommand {
    /// REGISTER request.
    Register {
        /// Challenge parameter, 32 bytes hex.
        #[arg(long)]
        challenge: String,
        /// Application parameter, 32 bytes hex.
        #[arg(long)]
        appid: String,
    },
    /// AUTHENTICATE request.
    Authenticate {
        /// Challenge parameter, 32 bytes hex.
        #[arg(long)]
        challenge: String,
        /// Application parameter, 32 bytes hex.
        #[arg(long)]
        appid: String,
        /// Keyhandle from registration, up to 255 bytes hex.
        #[arg(long)]
        keyhandle: String,
        /// Control mode.
        #[arg(long, value_enum, default_value = "enforce")]
        control: ControlArg,
    },
    /// VERSION request.
    Version,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ControlArg {
    Enforce,
    CheckOnly,
    DontEnforce,
}

impl From<ControlArg> for AuthControl {
    fn from(arg: ControlArg) -> Self {
        match arg {
            ControlArg::Enforce => AuthControl::EnforcePresence,
            ControlArg::CheckOnly => AuthControl::CheckOnly,
            ControlArg::DontEnforce => AuthControl::DontEnforcePresence,
        }
    }
}

#[derive(Args, Debug)]
pub struct FramesArgs {
    /// Message bytes in hex (typically an APDU).
    pub hex: String,
    /// Link MTU in bytes, header included.
    #[arg(long, default_value_t = u2fble_frame::DEFAULT_MTU)]
    pub mtu: usize,
    /// Frame command.
    #[arg(long, value_enum, default_value = "msg")]
    pub command: FrameCommandArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum FrameCommandArg {
    Ping,
    Keepalive,
    Msg,
}

impl FrameCommandArg {
    pub fn code(self) -> u8 {
        match self {
            FrameCommandArg::Ping => PING,
            FrameCommandArg::Keepalive => KEEPALIVE,
            FrameCommandArg::Msg => MSG,
        }
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Operation the response answers.
    #[arg(value_enum)]
    pub operation: OperationArg,
    /// Response APDU in hex, status word included.
    pub hex: String,
    /// Challenge of the request, to rebuild the signed data.
    #[arg(long, requires = "appid")]
    pub challenge: Option<String>,
    /// Application parameter of the request, to rebuild the signed data.
    #[arg(long, requires = "challenge")]
    pub appid: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum OperationArg {
    Register,
    Authenticate,
    Version,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Register => Operation::Register,
            OperationArg::Authenticate => Operation::Authenticate,
            OperationArg::Version => Operation::Version,
        }
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
