use std::fmt;

/// Trailing 2-byte outcome code of every response, big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    /// The request was processed.
    pub const NO_ERROR: Self = Self(0x9000);
    /// User presence is required; re-issue the request after the user acts.
    pub const CONDITIONS_NOT_SATISFIED: Self = Self(0x6985);
    /// The request was rejected, e.g. an unknown keyhandle.
    pub const WRONG_DATA: Self = Self(0x6a80);
    /// The request length is invalid.
    pub const WRONG_LENGTH: Self = Self(0x6700);
    /// The class byte is not supported.
    pub const CLA_NOT_SUPPORTED: Self = Self(0x6e00);
    /// The instruction is not supported.
    pub const INS_NOT_SUPPORTED: Self = Self(0x6d00);

    /// Read the status word from the last two bytes of a response.
    pub fn from_trailer(raw: &[u8]) -> Option<Self> {
        match raw {
            [.., hi, lo] => Some(Self(u16::from_be_bytes([*hi, *lo]))),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::NO_ERROR
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NO_ERROR => "no error",
            Self::CONDITIONS_NOT_SATISFIED => "conditions not satisfied (user presence required)",
            Self::WRONG_DATA => "wrong data",
            Self::WRONG_LENGTH => "wrong length",
            Self::CLA_NOT_SUPPORTED => "class not supported",
            Self::INS_NOT_SUPPORTED => "instruction not supported",
            _ => "unknown status",
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x} ({})", self.0, self.description())
    }
}

impl From<u16> for StatusWord {
    fn from(code: u16) -> Self {
        Self(code)
    }
}
