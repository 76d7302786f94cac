use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// A connected authenticator reachable over a write/notify link.
///
/// Writes are fire-and-acknowledge: [`DeviceHandle::write`] only queues the
/// frame, and the outcome is delivered later as [`LinkEvent::WriteAck`]
/// through whatever event source the host stack provides.
pub trait DeviceHandle {
    /// Queue one frame for the control-point characteristic.
    ///
    /// An `Err` means the write could not be issued at all; no acknowledgement
    /// will follow it.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Whether the host holds a bond with the device.
    fn is_paired(&self) -> bool;

    /// Device address, for diagnostics only.
    fn address(&self) -> &str;

    /// Negotiated maximum frame size in bytes, or 0 when the link has not
    /// reported one.
    fn mtu(&self) -> usize {
        0
    }
}

impl<D: DeviceHandle + ?Sized> DeviceHandle for Box<D> {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        (**self).write(frame)
    }

    fn is_paired(&self) -> bool {
        (**self).is_paired()
    }

    fn address(&self) -> &str {
        (**self).address()
    }

    fn mtu(&self) -> usize {
        (**self).mtu()
    }
}

/// Something the link reports back to the exchange engine.
#[derive(Debug)]
pub enum LinkEvent {
    /// Outcome of the oldest outstanding frame write.
    WriteAck(Result<()>),
    /// One notification frame from the status characteristic.
    Notify(Bytes),
    /// The notification subscription failed.
    NotifyFailed(TransportError),
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Create the channel a host stack uses to feed [`LinkEvent`]s to a session.
pub fn link_events() -> (LinkEventSender, LinkEventReceiver) {
    mpsc::unbounded_channel()
}
