use serde::Serialize;
use tracing::debug;
use u2fble_protocol::{from_hex, to_hex, AuthControl, ProtocolMessage};

use crate::cmd::{ApduArgs, ApduCommand};
use crate::exit::{protocol_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat, Record};

#[derive(Serialize)]
pub struct ApduOutput {
    pub operation: String,
    pub length: usize,
    pub apdu: String,
    #[serde(skip)]
    bytes: Vec<u8>,
}

impl Record for ApduOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("operation", self.operation.clone()),
            ("length", self.length.to_string()),
            ("apdu", self.apdu.clone()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

pub fn run(args: ApduArgs, format: OutputFormat) -> CliResult<i32> {
    let message = build(args.command).map_err(|err| protocol_error("apdu", err))?;
    let apdu = message
        .encode_request()
        .map_err(|err| protocol_error("apdu", err))?;
    debug!(operation = %message.operation(), len = apdu.len(), "encoded request");

    print_record(
        &ApduOutput {
            operation: message.operation().to_string(),
            length: apdu.len(),
            apdu: to_hex(&apdu),
            bytes: apdu.to_vec(),
        },
        format,
    );
    Ok(SUCCESS)
}

pub fn build(command: ApduCommand) -> u2fble_protocol::Result<ProtocolMessage> {
    let mut message = ProtocolMessage::new();
    match command {
        ApduCommand::Register { challenge, appid } => {
            message.set_register()?;
            message.set_challenge(&from_hex(&challenge)?)?;
            message.set_appid(&from_hex(&appid)?)?;
        }
        ApduCommand::Authenticate {
            challenge,
            appid,
            keyhandle,
            control,
        } => {
            message.set_authenticate(AuthControl::from(control))?;
            message.set_challenge(&from_hex(&challenge)?)?;
            message.set_appid(&from_hex(&appid)?)?;
            message.set_keyhandle(&from_hex(&keyhandle)?)?;
        }
        ApduCommand::Version => message.set_version()?,
    }
    Ok(message)
}
