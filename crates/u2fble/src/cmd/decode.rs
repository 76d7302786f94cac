use serde::Serialize;
use tracing::debug;
use u2fble_protocol::{from_hex, to_hex, Operation, ProtocolMessage, StatusWord};

use crate::cmd::DecodeArgs;
use crate::exit::{protocol_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_record, OutputFormat, Record};

#[derive(Serialize)]
pub struct DecodedOutput {
    pub operation: String,
    pub status: String,
    pub status_text: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyhandle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_presence: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_part: Option<String>,
    #[serde(skip)]
    signed_bytes: Vec<u8>,
}

impl DecodedOutput {
    fn from_message(message: &ProtocolMessage, status: StatusWord) -> Self {
        // REGISTER returns a keyhandle; AUTHENTICATE only echoes the request's.
        let keyhandle = match message.operation() {
            Operation::Register => message.keyhandle().map(to_hex),
            _ => None,
        };
        Self {
            operation: message.operation().to_string(),
            status: format!("{:#06x}", status.code()),
            status_text: status.description(),
            success: status.is_success(),
            version: message.version().map(str::to_string),
            public_key: message.public_key().map(to_hex),
            keyhandle,
            certificate: message.certificate().map(to_hex),
            user_presence: message.user_presence(),
            counter: message.counter(),
            signature: message.signature().map(to_hex),
            signed_part: message.signed_part().map(to_hex),
            signed_bytes: message
                .signed_part()
                .map(|b| b.to_vec())
                .unwrap_or_default(),
        }
    }
}

impl Record for DecodedOutput {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("operation", self.operation.clone()),
            ("status", format!("{} ({})", self.status, self.status_text)),
        ];
        let optional = [
            ("version", self.version.clone()),
            ("public_key", self.public_key.clone()),
            ("keyhandle", self.keyhandle.clone()),
            ("certificate", self.certificate.clone()),
            ("user_presence", self.user_presence.map(|p| p.to_string())),
            ("counter", self.counter.map(|c| c.to_string())),
            ("signature", self.signature.clone()),
            ("signed_part", self.signed_part.clone()),
        ];
        rows.extend(
            optional
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name, v))),
        );
        rows
    }

    fn raw(&self) -> Vec<u8> {
        self.signed_bytes.clone()
    }
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let out = decode(&args).map_err(|err| protocol_error("decode", err))?;
    let code = if out.success { SUCCESS } else { FAILURE };
    print_record(&out, format);
    Ok(code)
}

fn decode(args: &DecodeArgs) -> u2fble_protocol::Result<DecodedOutput> {
    let mut message = ProtocolMessage::new();
    match Operation::from(args.operation) {
        Operation::Register => message.set_register()?,
        Operation::Authenticate => message.set_authenticate(Default::default())?,
        _ => message.set_version()?,
    }
    if let (Some(challenge), Some(appid)) = (&args.challenge, &args.appid) {
        message.set_challenge(&from_hex(challenge)?)?;
        message.set_appid(&from_hex(appid)?)?;
    }

    let raw = from_hex(&args.hex)?;
    let status = message.apply_response(&raw)?;
    debug!(%status, operation = %message.operation(), "decoded response");
    Ok(DecodedOutput::from_message(&message, status))
}
