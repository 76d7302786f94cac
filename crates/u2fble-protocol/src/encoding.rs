//! Hex text at the API boundary.

use crate::error::Result;

/// Lowercase hexadecimal, two characters per byte.
pub fn to_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}

/// Parse hexadecimal text (either case); odd length or non-hex digits are rejected.
pub fn from_hex(text: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn encodes_lowercase_pairs() {
        assert_eq!(to_hex([0x00, 0xab, 0x7f, 0xff]), "00ab7fff");
        assert_eq!(to_hex([]), "");
    }

    #[test]
    fn decodes_either_case() {
        assert_eq!(from_hex("00AbFF").unwrap(), vec![0x00, 0xab, 0xff]);
        assert!(from_hex("").unwrap().is_empty());
    }

    #[test]
    fn rejects_odd_length() {
        assert_eq!(
            from_hex("abc"),
            Err(ProtocolError::InvalidHex(hex::FromHexError::OddLength))
        );
    }

    #[test]
    fn rejects_non_hex_digit() {
        assert!(matches!(
            from_hex("0g"),
            Err(ProtocolError::InvalidHex(
                hex::FromHexError::InvalidHexCharacter { c: 'g', index: 1 }
            ))
        ));
    }
}
