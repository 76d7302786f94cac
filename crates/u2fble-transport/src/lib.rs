//! Device boundary for U2F over a GATT-style write/notify link.
//!
//! This is the lowest layer of u2fble. Discovery, pairing and the host
//! Bluetooth stack live outside this crate; what remains is the contract the
//! exchange engine consumes:
//! - [`DeviceHandle`] issues frame writes and reports pairing state
//! - [`LinkEvent`] carries write acknowledgements and notification frames
//!   back into the engine, in arrival order
//!
//! [`MemoryDevice`] is an in-process implementation used for tests and demos.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryDevice, MemoryRemote};
pub use traits::{link_events, DeviceHandle, LinkEvent, LinkEventReceiver, LinkEventSender};
