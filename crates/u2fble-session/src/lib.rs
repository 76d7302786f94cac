//! Per-device U2F exchange engine.
//!
//! An [`ExchangeSession`] owns the single exchange slot of one device and
//! runs it through `IDLE → SENDING → AWAITING_RESPONSE → COMPLETING`, or to
//! `ERROR` on a failure, before returning to `IDLE`:
//! - request frames are written one at a time, each after the previous
//!   write is acknowledged
//! - the response deadline is armed when the last frame is acknowledged and
//!   re-armed by keepalives
//! - the completion continuation runs exactly once per accepted start
//!
//! The session is sans-IO. [`drive`] and [`exchange`] run it against a
//! tokio channel of [`LinkEvent`](u2fble_transport::LinkEvent)s.

pub mod config;
pub mod driver;
pub mod error;
pub mod session;

pub use config::{PairingPolicy, SessionConfig};
pub use driver::{drive, exchange};
pub use error::{ExchangeError, Rejected, Result, SessionError};
pub use session::{Completion, ExchangeOutcome, ExchangeSession, State};
