use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{link_events, DeviceHandle, LinkEvent, LinkEventReceiver, LinkEventSender};

/// In-memory device link.
///
/// Every frame written through the [`DeviceHandle`] side is recorded and,
/// unless acknowledgements are held, immediately acknowledged on the link
/// event channel. The paired [`MemoryRemote`] plays the authenticator: it
/// reads what was written and injects notification frames.
pub struct MemoryDevice {
    address: String,
    mtu: usize,
    shared: Arc<Mutex<Shared>>,
    events: LinkEventSender,
}

/// Authenticator-side control of a [`MemoryDevice`].
#[derive(Clone)]
pub struct MemoryRemote {
    address: String,
    shared: Arc<Mutex<Shared>>,
    events: LinkEventSender,
}

#[derive(Default)]
struct Shared {
    paired: bool,
    disconnected: bool,
    written: Vec<Bytes>,
    refuse_next_write: bool,
    fail_next_ack: bool,
    hold_acks: bool,
    held: VecDeque<Result<()>>,
}

impl MemoryDevice {
    /// Create a paired device with the given address and MTU.
    ///
    /// Returns the device handle, its remote end, and the receiver the
    /// exchange engine consumes link events from.
    pub fn new(address: impl Into<String>, mtu: usize) -> (Self, MemoryRemote, LinkEventReceiver) {
        let address = address.into();
        let (events, rx) = link_events();
        let shared = Arc::new(Mutex::new(Shared {
            paired: true,
            ..Shared::default()
        }));
        let remote = MemoryRemote {
            address: address.clone(),
            shared: Arc::clone(&shared),
            events: events.clone(),
        };
        let device = Self {
            address,
            mtu,
            shared,
            events,
        };
        (device, remote, rx)
    }
}

impl DeviceHandle for MemoryDevice {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.disconnected {
            return Err(TransportError::Disconnected(self.address.clone()));
        }
        if std::mem::take(&mut shared.refuse_next_write) {
            return Err(TransportError::Write {
                address: self.address.clone(),
                reason: "write refused".to_string(),
            });
        }

        shared.written.push(Bytes::copy_from_slice(frame));
        let ack = if std::mem::take(&mut shared.fail_next_ack) {
            Err(TransportError::Write {
                address: self.address.clone(),
                reason: "write not acknowledged".to_string(),
            })
        } else {
            Ok(())
        };
        debug!(address = %self.address, len = frame.len(), "memory link write");

        if shared.hold_acks {
            shared.held.push_back(ack);
            return Ok(());
        }
        drop(shared);

        self.events
            .send(LinkEvent::WriteAck(ack))
            .map_err(|_| TransportError::Closed)
    }

    fn is_paired(&self) -> bool {
        lock(&self.shared).paired
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

impl MemoryRemote {
    /// Frames written so far, oldest first.
    pub fn written(&self) -> Vec<Bytes> {
        lock(&self.shared).written.clone()
    }

    /// Drain the written frames.
    pub fn take_written(&self) -> Vec<Bytes> {
        std::mem::take(&mut lock(&self.shared).written)
    }

    /// Deliver one notification frame to the engine.
    pub fn notify(&self, frame: impl Into<Bytes>) -> Result<()> {
        self.send(LinkEvent::Notify(frame.into()))
    }

    /// Deliver a notification failure to the engine.
    pub fn notify_failed(&self, reason: &str) -> Result<()> {
        self.send(LinkEvent::NotifyFailed(TransportError::Notify {
            address: self.address.clone(),
            reason: reason.to_string(),
        }))
    }

    /// Make the next `write` fail synchronously.
    pub fn refuse_next_write(&self) {
        lock(&self.shared).refuse_next_write = true;
    }

    /// Make the acknowledgement of the next `write` report a failure.
    pub fn fail_next_ack(&self) {
        lock(&self.shared).fail_next_ack = true;
    }

    /// Stop acknowledging writes until [`MemoryRemote::release_acks`].
    pub fn hold_acks(&self) {
        lock(&self.shared).hold_acks = true;
    }

    /// Resume acknowledging writes and flush the held acknowledgements.
    pub fn release_acks(&self) -> Result<()> {
        let held = {
            let mut shared = lock(&self.shared);
            shared.hold_acks = false;
            std::mem::take(&mut shared.held)
        };
        for ack in held {
            self.send(LinkEvent::WriteAck(ack))?;
        }
        Ok(())
    }

    /// Drop the connection: the engine sees a notification failure and
    /// every later write fails.
    pub fn disconnect(&self) -> Result<()> {
        lock(&self.shared).disconnected = true;
        self.send(LinkEvent::NotifyFailed(TransportError::Disconnected(
            self.address.clone(),
        )))
    }

    /// Change the reported bond state.
    pub fn set_paired(&self, paired: bool) {
        lock(&self.shared).paired = paired;
    }

    fn send(&self, event: LinkEvent) -> Result<()> {
        self.events.send(event).map_err(|_| TransportError::Closed)
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}
