//! Stateless codec between U2F fields and raw APDUs.
//!
//! Request layout:
//! ```text
//! ┌─────┬─────┬─────┬─────┬──────────────┬──────────┬──────────┐
//! │ CLA │ INS │ P1  │ P2  │ Lc (1 or 3)  │ data…    │ Le (1/2) │
//! └─────┴─────┴─────┴─────┴──────────────┴──────────┴──────────┘
//! ```
//! Short encoding is used whenever the data fits in 255 bytes; longer
//! AUTHENTICATE requests switch to ISO 7816-4 extended lengths.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::message::{AuthControl, Operation, APPID_LEN, CHALLENGE_LEN};
use crate::status::StatusWord;

pub const CLA: u8 = 0x00;
pub const INS_REGISTER: u8 = 0x01;
pub const INS_AUTHENTICATE: u8 = 0x02;
pub const INS_VERSION: u8 = 0x03;

/// Reserved first byte of a REGISTER response.
pub const REGISTER_RESERVED: u8 = 0x05;

/// Reserved first byte of the REGISTER signed data.
pub const REGISTER_SIGNED_RESERVED: u8 = 0x00;

/// Uncompressed P-256 point: 0x04 ‖ X ‖ Y.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Keyhandles are length-prefixed by a single byte.
pub const MAX_KEYHANDLE_LEN: usize = 255;

const SHORT_MAX_DATA: usize = 255;
const DER_SEQUENCE: u8 = 0x30;

/// Encode a REGISTER request.
pub fn encode_register(challenge: &[u8; CHALLENGE_LEN], appid: &[u8; APPID_LEN]) -> Bytes {
    let mut data = BytesMut::with_capacity(CHALLENGE_LEN + APPID_LEN);
    data.put_slice(challenge);
    data.put_slice(appid);
    encode_apdu(INS_REGISTER, 0x00, &data)
}

/// Encode an AUTHENTICATE request.
pub fn encode_authenticate(
    challenge: &[u8; CHALLENGE_LEN],
    appid: &[u8; APPID_LEN],
    keyhandle: &[u8],
    control: AuthControl,
) -> Result<Bytes> {
    if keyhandle.len() > MAX_KEYHANDLE_LEN {
        return Err(ProtocolError::TooLong {
            field: "keyhandle",
            actual: keyhandle.len(),
            max: MAX_KEYHANDLE_LEN,
        });
    }

    let mut data = BytesMut::with_capacity(CHALLENGE_LEN + APPID_LEN + 1 + keyhandle.len());
    data.put_slice(challenge);
    data.put_slice(appid);
    data.put_u8(keyhandle.len() as u8);
    data.put_slice(keyhandle);
    Ok(encode_apdu(INS_AUTHENTICATE, control.as_byte(), &data))
}

/// Encode a VERSION request: header and expected length only.
pub fn encode_version() -> Bytes {
    encode_apdu(INS_VERSION, 0x00, &[])
}

fn encode_apdu(ins: u8, p1: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 3 + data.len() + 2);
    buf.put_slice(&[CLA, ins, p1, 0x00]);

    if data.is_empty() {
        buf.put_u8(0x00);
    } else if data.len() <= SHORT_MAX_DATA {
        buf.put_u8(data.len() as u8);
        buf.put_slice(data);
        buf.put_u8(0x00);
    } else {
        buf.put_u8(0x00);
        // Callers cap data well below u16::MAX (keyhandle <= 255).
        buf.put_u16(data.len() as u16);
        buf.put_slice(data);
        buf.put_u16(0x0000);
    }

    debug!(ins, p1, len = buf.len(), "encoded request apdu");
    buf.freeze()
}

/// Fields of a successful REGISTER response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub public_key: Bytes,
    pub key_handle: Bytes,
    pub certificate: Bytes,
    pub signature: Bytes,
}

/// Fields of a successful AUTHENTICATE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateResponse {
    /// Raw flags byte; bit 0 is user presence.
    pub flags: u8,
    pub counter: u32,
    pub signature: Bytes,
}

impl AuthenticateResponse {
    pub fn user_presence(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

/// Operation-specific part of a decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Non-success status, or nothing to parse.
    Empty,
    Register(RegisterResponse),
    Authenticate(AuthenticateResponse),
    Version(String),
}

/// A decoded response: status word plus parsed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResponse {
    pub status: StatusWord,
    pub body: ResponseBody,
}

/// Decode a raw response APDU for `operation`.
///
/// The status word is always read first; fields are only parsed when it
/// signals success.
pub fn decode_response(raw: &[u8], operation: Operation) -> Result<DecodedResponse> {
    let status = StatusWord::from_trailer(raw).ok_or(ProtocolError::Truncated {
        operation,
        len: raw.len(),
        need: 2,
    })?;

    if !status.is_success() {
        debug!(%status, %operation, "response carries non-success status");
        return Ok(DecodedResponse {
            status,
            body: ResponseBody::Empty,
        });
    }

    let data = &raw[..raw.len() - 2];
    let body = match operation {
        Operation::None => ResponseBody::Empty,
        Operation::Register => ResponseBody::Register(decode_register(data)?),
        Operation::Authenticate => ResponseBody::Authenticate(decode_authenticate(data)?),
        Operation::Version => ResponseBody::Version(
            String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::VersionNotUtf8)?,
        ),
    };

    Ok(DecodedResponse { status, body })
}

fn decode_register(data: &[u8]) -> Result<RegisterResponse> {
    // reserved + public key + keyhandle length + DER header + signature byte
    const MIN_LEN: usize = 1 + PUBLIC_KEY_LEN + 1 + 2 + 1;
    if data.len() < MIN_LEN {
        return Err(ProtocolError::Truncated {
            operation: Operation::Register,
            len: data.len(),
            need: MIN_LEN,
        });
    }

    let mut rest = Reader::new(data);
    let reserved = rest.take_u8("reserved byte")?;
    if reserved != REGISTER_RESERVED {
        return Err(ProtocolError::ReservedByte(reserved));
    }
    let public_key = rest.take(PUBLIC_KEY_LEN, "public key")?;
    let kh_len = usize::from(rest.take_u8("keyhandle length")?);
    let key_handle = rest.take(kh_len, "keyhandle")?;
    let cert_len = der_element_len(rest.remaining())?;
    let certificate = rest.take(cert_len, "certificate")?;
    let signature = rest.take_rest("signature")?;

    Ok(RegisterResponse {
        public_key: Bytes::copy_from_slice(public_key),
        key_handle: Bytes::copy_from_slice(key_handle),
        certificate: Bytes::copy_from_slice(certificate),
        signature: Bytes::copy_from_slice(signature),
    })
}

fn decode_authenticate(data: &[u8]) -> Result<AuthenticateResponse> {
    // flags + counter + signature byte
    const MIN_LEN: usize = 1 + 4 + 1;
    if data.len() < MIN_LEN {
        return Err(ProtocolError::Truncated {
            operation: Operation::Authenticate,
            len: data.len(),
            need: MIN_LEN,
        });
    }

    let mut rest = Reader::new(data);
    let flags = rest.take_u8("user presence")?;
    let counter = rest.take(4, "counter")?;
    let signature = rest.take_rest("signature")?;

    Ok(AuthenticateResponse {
        flags,
        counter: u32::from_be_bytes([counter[0], counter[1], counter[2], counter[3]]),
        signature: Bytes::copy_from_slice(signature),
    })
}

/// Total length (header + content) of the DER element at the start of `data`.
fn der_element_len(data: &[u8]) -> Result<usize> {
    let (&tag, rest) = data.split_first().ok_or(ProtocolError::Overrun {
        field: "certificate",
        need: 2,
        available: 0,
    })?;
    if tag != DER_SEQUENCE {
        return Err(ProtocolError::Certificate("expected SEQUENCE tag"));
    }
    let (&first, rest) = rest.split_first().ok_or(ProtocolError::Overrun {
        field: "certificate",
        need: 2,
        available: 1,
    })?;

    if first < 0x80 {
        return Ok(2 + usize::from(first));
    }

    let count = usize::from(first & 0x7f);
    if count == 0 {
        return Err(ProtocolError::Certificate("indefinite length"));
    }
    if count > 4 {
        return Err(ProtocolError::Certificate("length field too wide"));
    }
    if rest.len() < count {
        return Err(ProtocolError::Overrun {
            field: "certificate",
            need: 2 + count,
            available: data.len(),
        });
    }

    let content = rest[..count]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    usize::try_from(content)
        .ok()
        .and_then(|content| content.checked_add(2 + count))
        .ok_or(ProtocolError::Overrun {
            field: "certificate",
            need: usize::MAX,
            available: data.len(),
        })
}

/// Signed data of a REGISTER response:
/// `0x00 ‖ appid ‖ challenge ‖ keyhandle ‖ public key`.
pub fn register_signed_part(
    appid: &[u8; APPID_LEN],
    challenge: &[u8; CHALLENGE_LEN],
    key_handle: &[u8],
    public_key: &[u8],
) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(1 + APPID_LEN + CHALLENGE_LEN + key_handle.len() + public_key.len());
    buf.put_u8(REGISTER_SIGNED_RESERVED);
    buf.put_slice(appid);
    buf.put_slice(challenge);
    buf.put_slice(key_handle);
    buf.put_slice(public_key);
    buf.freeze()
}

/// Signed data of an AUTHENTICATE response:
/// `appid ‖ flags ‖ counter ‖ challenge`.
pub fn authenticate_signed_part(
    appid: &[u8; APPID_LEN],
    flags: u8,
    counter: u32,
    challenge: &[u8; CHALLENGE_LEN],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(APPID_LEN + 1 + 4 + CHALLENGE_LEN);
    buf.put_slice(appid);
    buf.put_u8(flags);
    buf.put_u32(counter);
    buf.put_slice(challenge);
    buf.freeze()
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn remaining(&self) -> &'a [u8] {
        self.data
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(ProtocolError::Overrun {
                field,
                need: n,
                available: self.data.len(),
            });
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn take_u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    /// Everything left; must be non-empty.
    fn take_rest(&mut self, field: &'static str) -> Result<&'a [u8]> {
        if self.data.is_empty() {
            return Err(ProtocolError::Overrun {
                field,
                need: 1,
                available: 0,
            });
        }
        Ok(std::mem::take(&mut self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: [u8; 32] = [0x00; 32];
    const APPID: [u8; 32] = [0x01; 32];

    fn with_status(body: &[u8], status: StatusWord) -> Vec<u8> {
        let mut raw = body.to_vec();
        raw.extend_from_slice(&status.to_be_bytes());
        raw
    }

    #[test]
    fn register_request_layout() {
        let apdu = encode_register(&CHALLENGE, &APPID);

        assert_eq!(apdu.len(), 4 + 1 + 64 + 1);
        assert_eq!(&apdu[..5], &[0x00, INS_REGISTER, 0x00, 0x00, 0x40]);
        assert_eq!(&apdu[5..37], &CHALLENGE);
        assert_eq!(&apdu[37..69], &APPID);
        assert_eq!(apdu[69], 0x00);
    }

    #[test]
    fn authenticate_request_layout() {
        let kh = [0xaa; 64];
        let apdu = encode_authenticate(&CHALLENGE, &APPID, &kh, AuthControl::CheckOnly).unwrap();

        assert_eq!(&apdu[..5], &[0x00, INS_AUTHENTICATE, 0x07, 0x00, 65 + 64]);
        assert_eq!(apdu[5 + 64], 64);
        assert_eq!(&apdu[5 + 65..5 + 65 + 64], &kh);
        assert_eq!(apdu.len(), 5 + 65 + 64 + 1);
    }

    #[test]
    fn long_keyhandle_uses_extended_length() {
        let kh = [0xbb; 255];
        let apdu =
            encode_authenticate(&CHALLENGE, &APPID, &kh, AuthControl::EnforcePresence).unwrap();

        assert_eq!(&apdu[..7], &[0x00, INS_AUTHENTICATE, 0x03, 0x00, 0x00, 0x01, 0x40]);
        assert_eq!(apdu.len(), 7 + 320 + 2);
        assert_eq!(&apdu[apdu.len() - 2..], &[0x00, 0x00]);
    }

    #[test]
    fn keyhandle_over_255_is_rejected() {
        let err = encode_authenticate(&CHALLENGE, &APPID, &[0u8; 256], AuthControl::default())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::TooLong { actual: 256, .. }));
    }

    #[test]
    fn version_request_is_header_only() {
        assert_eq!(encode_version().as_ref(), &[0x00, INS_VERSION, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn non_success_status_skips_parsing() {
        let raw = with_status(&[0xde, 0xad], StatusWord::CONDITIONS_NOT_SATISFIED);
        let decoded = decode_response(&raw, Operation::Register).unwrap();

        assert_eq!(decoded.status, StatusWord::CONDITIONS_NOT_SATISFIED);
        assert_eq!(decoded.body, ResponseBody::Empty);
    }

    #[test]
    fn response_without_status_is_truncated() {
        let err = decode_response(&[0x90], Operation::Version).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { need: 2, .. }));
    }

    #[test]
    fn authenticate_response_fields() {
        let raw = with_status(
            &[0x01, 0x00, 0x00, 0x01, 0x02, 0x30, 0x45],
            StatusWord::NO_ERROR,
        );
        let decoded = decode_response(&raw, Operation::Authenticate).unwrap();

        let ResponseBody::Authenticate(auth) = decoded.body else {
            panic!("expected authenticate body");
        };
        assert!(auth.user_presence());
        assert_eq!(auth.counter, 0x0102);
        assert_eq!(auth.signature.as_ref(), &[0x30, 0x45]);
    }

    #[test]
    fn authenticate_response_too_short() {
        let raw = with_status(&[0x01, 0x00, 0x00, 0x00, 0x01], StatusWord::NO_ERROR);
        let err = decode_response(&raw, Operation::Authenticate).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { len: 5, need: 6, .. }));
    }

    #[test]
    fn version_response_text() {
        let raw = with_status(b"U2F_V2", StatusWord::NO_ERROR);
        let decoded = decode_response(&raw, Operation::Version).unwrap();
        assert_eq!(decoded.body, ResponseBody::Version("U2F_V2".to_string()));
    }

    #[test]
    fn version_response_rejects_invalid_utf8() {
        let raw = with_status(&[0xff, 0xfe], StatusWord::NO_ERROR);
        let err = decode_response(&raw, Operation::Version).unwrap_err();
        assert_eq!(err, ProtocolError::VersionNotUtf8);
    }

    #[test]
    fn der_short_and_long_lengths() {
        assert_eq!(der_element_len(&[0x30, 0x03, 1, 2, 3]).unwrap(), 5);
        assert_eq!(der_element_len(&[0x30, 0x81, 0x80]).unwrap(), 3 + 0x80);
        assert_eq!(der_element_len(&[0x30, 0x82, 0x01, 0x00]).unwrap(), 4 + 0x100);
    }

    #[test]
    fn der_rejects_bad_headers() {
        assert!(matches!(
            der_element_len(&[0x31, 0x00]),
            Err(ProtocolError::Certificate(_))
        ));
        assert!(matches!(
            der_element_len(&[0x30, 0x80]),
            Err(ProtocolError::Certificate(_))
        ));
        assert!(matches!(
            der_element_len(&[0x30, 0x82, 0x01]),
            Err(ProtocolError::Overrun { .. })
        ));
    }

    #[test]
    fn huge_certificate_length_is_an_overrun() {
        let mut raw = vec![REGISTER_RESERVED];
        raw.extend_from_slice(&[0x04; PUBLIC_KEY_LEN]);
        raw.push(1);
        raw.push(0xaa);
        raw.extend_from_slice(&[0x30, 0x84, 0xff, 0xff, 0xff, 0xff, 0x00]);
        raw.extend_from_slice(&[0x90, 0x00]);

        assert!(matches!(
            decode_response(&raw, Operation::Register),
            Err(ProtocolError::Overrun { field: "certificate", .. })
        ));
    }

    #[test]
    fn signed_parts_layout() {
        let auth = authenticate_signed_part(&APPID, 0x01, 7, &CHALLENGE);
        assert_eq!(auth.len(), 32 + 1 + 4 + 32);
        assert_eq!(&auth[..32], &APPID);
        assert_eq!(&auth[32..37], &[0x01, 0, 0, 0, 7]);
        assert_eq!(&auth[37..], &CHALLENGE);

        let reg = register_signed_part(&APPID, &CHALLENGE, &[9, 9], &[4; 65]);
        assert_eq!(reg.len(), 1 + 32 + 32 + 2 + 65);
        assert_eq!(reg[0], 0x00);
        assert_eq!(&reg[65..67], &[9, 9]);
    }
}
