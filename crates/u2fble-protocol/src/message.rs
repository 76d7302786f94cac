use std::fmt;

use bytes::Bytes;
use tracing::debug;

use crate::apdu::{
    authenticate_signed_part, decode_response, encode_authenticate, encode_register,
    encode_version, register_signed_part, ResponseBody, MAX_KEYHANDLE_LEN,
};
use crate::error::{ProtocolError, Result};
use crate::status::StatusWord;

/// Length of the challenge parameter (SHA-256 of the client data).
pub const CHALLENGE_LEN: usize = 32;

/// Length of the application parameter (SHA-256 of the app id).
pub const APPID_LEN: usize = 32;

/// The U2F operation a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    #[default]
    None,
    Register,
    Authenticate,
    Version,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::None => "NONE",
            Operation::Register => "REGISTER",
            Operation::Authenticate => "AUTHENTICATE",
            Operation::Version => "VERSION",
        })
    }
}

/// AUTHENTICATE control byte, sent as P1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthControl {
    /// Require user presence and sign.
    #[default]
    EnforcePresence,
    /// Only check whether the keyhandle belongs to this authenticator.
    CheckOnly,
    /// Sign without requiring user presence.
    DontEnforcePresence,
}

impl AuthControl {
    pub fn as_byte(self) -> u8 {
        match self {
            AuthControl::EnforcePresence => 0x03,
            AuthControl::CheckOnly => 0x07,
            AuthControl::DontEnforcePresence => 0x08,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(AuthControl::EnforcePresence),
            0x07 => Some(AuthControl::CheckOnly),
            0x08 => Some(AuthControl::DontEnforcePresence),
            _ => None,
        }
    }
}

/// One U2F operation: request fields set by the caller, response fields
/// filled in from the device reply.
///
/// The operation is chosen exactly once and decides which request setters
/// are legal. Every field can be set at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolMessage {
    operation: Operation,
    control: AuthControl,

    challenge: Option<[u8; CHALLENGE_LEN]>,
    appid: Option<[u8; APPID_LEN]>,
    keyhandle: Option<Bytes>,

    status: Option<StatusWord>,
    version: Option<String>,
    public_key: Option<Bytes>,
    certificate: Option<Bytes>,
    signature: Option<Bytes>,
    signed_part: Option<Bytes>,
    flags: Option<u8>,
    counter: Option<u32>,
}

impl ProtocolMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose REGISTER.
    pub fn set_register(&mut self) -> Result<()> {
        self.set_operation(Operation::Register)
    }

    /// Choose AUTHENTICATE with the given control mode.
    pub fn set_authenticate(&mut self, control: AuthControl) -> Result<()> {
        self.set_operation(Operation::Authenticate)?;
        self.control = control;
        Ok(())
    }

    /// Choose VERSION.
    pub fn set_version(&mut self) -> Result<()> {
        self.set_operation(Operation::Version)
    }

    fn set_operation(&mut self, operation: Operation) -> Result<()> {
        if self.operation != Operation::None {
            return Err(ProtocolError::OperationAlreadySet(self.operation));
        }
        self.operation = operation;
        Ok(())
    }

    /// Set the 32-byte challenge. REGISTER and AUTHENTICATE only.
    pub fn set_challenge(&mut self, challenge: &[u8]) -> Result<()> {
        self.allow("challenge", &[Operation::Register, Operation::Authenticate])?;
        if self.challenge.is_some() {
            return Err(ProtocolError::FieldAlreadySet("challenge"));
        }
        self.challenge = Some(fixed("challenge", challenge)?);
        Ok(())
    }

    /// Set the 32-byte application parameter. REGISTER and AUTHENTICATE only.
    pub fn set_appid(&mut self, appid: &[u8]) -> Result<()> {
        self.allow("appid", &[Operation::Register, Operation::Authenticate])?;
        if self.appid.is_some() {
            return Err(ProtocolError::FieldAlreadySet("appid"));
        }
        self.appid = Some(fixed("appid", appid)?);
        Ok(())
    }

    /// Set the keyhandle, at most 255 bytes. AUTHENTICATE only.
    pub fn set_keyhandle(&mut self, keyhandle: &[u8]) -> Result<()> {
        self.allow("keyhandle", &[Operation::Authenticate])?;
        if self.keyhandle.is_some() {
            return Err(ProtocolError::FieldAlreadySet("keyhandle"));
        }
        if keyhandle.len() > MAX_KEYHANDLE_LEN {
            return Err(ProtocolError::TooLong {
                field: "keyhandle",
                actual: keyhandle.len(),
                max: MAX_KEYHANDLE_LEN,
            });
        }
        self.keyhandle = Some(Bytes::copy_from_slice(keyhandle));
        Ok(())
    }

    fn allow(&self, field: &'static str, operations: &[Operation]) -> Result<()> {
        if operations.contains(&self.operation) {
            Ok(())
        } else {
            Err(ProtocolError::FieldNotAllowed {
                field,
                operation: self.operation,
            })
        }
    }

    /// Encode the request APDU for the chosen operation.
    pub fn encode_request(&self) -> Result<Bytes> {
        match self.operation {
            Operation::None => Err(ProtocolError::MissingField("operation")),
            Operation::Register => {
                let (challenge, appid) = self.request_params()?;
                Ok(encode_register(challenge, appid))
            }
            Operation::Authenticate => {
                let (challenge, appid) = self.request_params()?;
                let keyhandle = self
                    .keyhandle
                    .as_ref()
                    .ok_or(ProtocolError::MissingField("keyhandle"))?;
                encode_authenticate(challenge, appid, keyhandle, self.control)
            }
            Operation::Version => Ok(encode_version()),
        }
    }

    fn request_params(&self) -> Result<(&[u8; CHALLENGE_LEN], &[u8; APPID_LEN])> {
        let challenge = self
            .challenge
            .as_ref()
            .ok_or(ProtocolError::MissingField("challenge"))?;
        let appid = self
            .appid
            .as_ref()
            .ok_or(ProtocolError::MissingField("appid"))?;
        Ok((challenge, appid))
    }

    /// Decode a raw response APDU into the response fields.
    ///
    /// The status word is always recorded. Fields are filled in only on
    /// success; `signed_part` additionally needs challenge and appid.
    /// A REGISTER response also sets `keyhandle` to the issued handle.
    pub fn apply_response(&mut self, raw: &[u8]) -> Result<StatusWord> {
        if self.status.is_some() {
            return Err(ProtocolError::FieldAlreadySet("status"));
        }
        let decoded = decode_response(raw, self.operation)?;
        self.status = Some(decoded.status);

        match decoded.body {
            ResponseBody::Empty => {}
            ResponseBody::Version(text) => self.version = Some(text),
            ResponseBody::Register(reg) => {
                if let (Some(challenge), Some(appid)) = (&self.challenge, &self.appid) {
                    self.signed_part = Some(register_signed_part(
                        appid,
                        challenge,
                        &reg.key_handle,
                        &reg.public_key,
                    ));
                }
                self.keyhandle = Some(reg.key_handle);
                self.public_key = Some(reg.public_key);
                self.certificate = Some(reg.certificate);
                self.signature = Some(reg.signature);
            }
            ResponseBody::Authenticate(auth) => {
                if let (Some(challenge), Some(appid)) = (&self.challenge, &self.appid) {
                    self.signed_part = Some(authenticate_signed_part(
                        appid,
                        auth.flags,
                        auth.counter,
                        challenge,
                    ));
                }
                self.flags = Some(auth.flags);
                self.counter = Some(auth.counter);
                self.signature = Some(auth.signature);
            }
        }

        debug!(operation = %self.operation, status = %decoded.status, "response applied");
        Ok(decoded.status)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn control(&self) -> AuthControl {
        self.control
    }

    pub fn challenge(&self) -> Option<&[u8; CHALLENGE_LEN]> {
        self.challenge.as_ref()
    }

    pub fn appid(&self) -> Option<&[u8; APPID_LEN]> {
        self.appid.as_ref()
    }

    /// Request keyhandle for AUTHENTICATE, issued keyhandle after REGISTER.
    pub fn keyhandle(&self) -> Option<&Bytes> {
        self.keyhandle.as_ref()
    }

    pub fn status(&self) -> Option<StatusWord> {
        self.status
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn public_key(&self) -> Option<&Bytes> {
        self.public_key.as_ref()
    }

    pub fn certificate(&self) -> Option<&Bytes> {
        self.certificate.as_ref()
    }

    pub fn signature(&self) -> Option<&Bytes> {
        self.signature.as_ref()
    }

    /// Exact byte sequence the authenticator signed.
    pub fn signed_part(&self) -> Option<&Bytes> {
        self.signed_part.as_ref()
    }

    pub fn user_presence(&self) -> Option<bool> {
        self.flags.map(|f| f & 0x01 != 0)
    }

    pub fn counter(&self) -> Option<u32> {
        self.counter
    }
}

fn fixed<const N: usize>(field: &'static str, value: &[u8]) -> Result<[u8; N]> {
    value
        .try_into()
        .map_err(|_| ProtocolError::InvalidLength {
            field,
            expected: N,
            actual: value.len(),
        })
}
