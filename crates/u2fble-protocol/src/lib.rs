//! U2F raw message model and APDU codec.
//!
//! [`ProtocolMessage`] holds one operation's request and response fields and
//! enforces which fields are legal for the chosen operation. The [`apdu`]
//! module is the stateless codec between those fields and raw APDUs:
//! - REGISTER: `challenge(32) ‖ appid(32)` → public key, keyhandle,
//!   attestation certificate, signature
//! - AUTHENTICATE: `challenge(32) ‖ appid(32) ‖ len ‖ keyhandle` → user
//!   presence, counter, signature
//! - VERSION: no data → version text
//!
//! Every response ends in a 2-byte [`StatusWord`]; fields are only parsed
//! when it signals success. Signatures are not verified here; the exact
//! signed byte sequence is rebuilt into `signed_part` for the consumer.

pub mod apdu;
pub mod encoding;
pub mod error;
pub mod message;
pub mod status;

pub use apdu::{
    decode_response, encode_authenticate, encode_register, encode_version, AuthenticateResponse,
    DecodedResponse, RegisterResponse, ResponseBody,
};
pub use encoding::{from_hex, to_hex};
pub use error::{ProtocolError, Result};
pub use message::{AuthControl, Operation, ProtocolMessage, APPID_LEN, CHALLENGE_LEN};
pub use status::StatusWord;
