use serde::Serialize;
use u2fble_frame::command::command_name;
use u2fble_frame::{FragmentConfig, Fragmenter};
use u2fble_protocol::{from_hex, to_hex};

use crate::cmd::FramesArgs;
use crate::exit::{frame_error, protocol_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_record, OutputFormat, Record};

#[derive(Serialize)]
pub struct FramesOutput {
    pub command: &'static str,
    pub mtu: usize,
    pub length: usize,
    pub frames: Vec<String>,
    #[serde(skip)]
    bytes: Vec<u8>,
}

impl Record for FramesOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("command", self.command.to_string()),
            ("mtu", self.mtu.to_string()),
            ("length", self.length.to_string()),
        ];
        rows.extend(self.frames.iter().map(|f| ("frame", f.clone())));
        rows
    }

    fn raw(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

pub fn run(args: FramesArgs, format: OutputFormat) -> CliResult<i32> {
    print_record(&split(&args)?, format);
    Ok(SUCCESS)
}

fn split(args: &FramesArgs) -> CliResult<FramesOutput> {
    if args.mtu == 0 {
        return Err(CliError::new(USAGE, "frames: mtu must be at least 1"));
    }
    let message = from_hex(&args.hex).map_err(|err| protocol_error("frames", err))?;
    let config = FragmentConfig {
        mtu: args.mtu,
        ..FragmentConfig::default()
    };
    let command = args.command.code();
    let frames: Vec<_> = Fragmenter::with_config(command, message.clone(), config)
        .map_err(|err| frame_error("frames", err))?
        .collect();

    Ok(FramesOutput {
        command: command_name(command),
        mtu: args.mtu,
        length: message.len(),
        frames: frames.iter().map(to_hex).collect(),
        bytes: frames.concat(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::FrameCommandArg;

    fn args(hex: &str, mtu: usize) -> FramesArgs {
        FramesArgs {
            hex: hex.to_string(),
            mtu,
            command: FrameCommandArg::Msg,
        }
    }

    #[test]
    fn splits_version_apdu() {
        let out = split(&args("0003000000", 5)).unwrap();
        assert_eq!(out.command, "MSG");
        assert_eq!(out.frames, vec!["8300050003", "00000000"]);
        assert_eq!(out.raw().len(), 5 + 4);
    }

    #[test]
    fn zero_mtu_is_a_usage_error() {
        assert_eq!(split(&args("00", 0)).unwrap_err().code, USAGE);
    }

    #[test]
    fn bad_hex_is_a_data_error() {
        assert_eq!(
            split(&args("0g", 20)).unwrap_err().code,
            crate::exit::DATA_INVALID
        );
    }
}
