use std::time::Duration;

use u2fble_frame::{DEFAULT_MTU, MAX_MESSAGE_SIZE};

/// What `start()` does when the device reports no bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingPolicy {
    /// Log a warning and send anyway.
    #[default]
    Warn,
    /// Refuse the exchange with [`SessionError::NotPaired`](crate::SessionError::NotPaired).
    Require,
}

/// Configuration for an [`ExchangeSession`](crate::ExchangeSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed between the last acknowledged request frame (or the
    /// latest keepalive) and a complete response. Default: 30s.
    pub response_timeout: Duration,
    /// Behaviour for unpaired devices. Default: warn.
    pub pairing_policy: PairingPolicy,
    /// Frame size used when the device reports an MTU of 0. Default: 20.
    pub mtu: usize,
    /// Largest response the reassembler accepts. Default: 65535.
    pub max_response_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            pairing_policy: PairingPolicy::Warn,
            mtu: DEFAULT_MTU,
            max_response_size: MAX_MESSAGE_SIZE,
        }
    }
}
