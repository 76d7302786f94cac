use std::fmt;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use u2fble_frame::command::{command_name, KEEPALIVE_UP_NEEDED};
use u2fble_frame::{FragmentConfig, Fragmenter, Reassembler, ERROR, KEEPALIVE, MSG};
use u2fble_protocol::{ProtocolMessage, StatusWord};
use u2fble_transport::{DeviceHandle, LinkEvent, TransportError};

use crate::config::{PairingPolicy, SessionConfig};
use crate::error::{ExchangeError, Rejected, SessionError};

/// Exchange state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No exchange pending; `start()` is accepted.
    Idle,
    /// Request frames are being written.
    Sending,
    /// All frames acknowledged; collecting notification frames.
    AwaitingResponse,
    /// Response reassembled; decoding and completing.
    Completing,
    /// The exchange failed and is being completed.
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Idle => "IDLE",
            State::Sending => "SENDING",
            State::AwaitingResponse => "AWAITING_RESPONSE",
            State::Completing => "COMPLETING",
            State::Error => "ERROR",
        })
    }
}

/// How an exchange ended.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// The device replied and the reply decoded. The status may still be a
    /// condition such as "user presence required".
    Status(StatusWord),
    /// The exchange failed before a status could be read.
    Failed(ExchangeError),
}

impl ExchangeOutcome {
    pub fn status(&self) -> Option<StatusWord> {
        match self {
            ExchangeOutcome::Status(status) => Some(*status),
            ExchangeOutcome::Failed(_) => None,
        }
    }

    /// True only for a decoded `0x9000`.
    pub fn is_success(&self) -> bool {
        self.status().is_some_and(StatusWord::is_success)
    }
}

/// Delivered exactly once per accepted `start()`.
#[derive(Debug)]
pub struct Completion {
    pub outcome: ExchangeOutcome,
    /// The message passed to `start()`, with response fields filled in when
    /// the reply decoded.
    pub message: ProtocolMessage,
}

type Continuation = Box<dyn FnOnce(Completion) + Send>;

struct Pending {
    message: ProtocolMessage,
    cursor: Fragmenter,
    continuation: Continuation,
}

/// One U2F exchange at a time against one device.
///
/// The session performs no I/O of its own: frame writes go through the
/// [`DeviceHandle`], and the host feeds acknowledgements, notifications and
/// timer ticks back in through [`handle_event`](Self::handle_event) and
/// [`poll_timeout`](Self::poll_timeout). [`drive`](crate::drive) does this
/// against a tokio channel and timer.
///
/// Exactly one frame write is outstanding while sending; the next frame is
/// written when the previous one is acknowledged.
pub struct ExchangeSession<D> {
    device: D,
    config: SessionConfig,
    state: State,
    pending: Option<Pending>,
    reassembler: Reassembler,
    deadline: Option<Instant>,
    /// A frame write was accepted by the device and its ack is still due.
    write_outstanding: bool,
    /// Acks still owed for writes of exchanges that already ended.
    stale_acks: usize,
}

impl<D: DeviceHandle> ExchangeSession<D> {
    /// Create a session with default configuration.
    pub fn new(device: D) -> Self {
        Self::with_config(device, SessionConfig::default())
    }

    /// Create a session with explicit configuration.
    pub fn with_config(device: D, config: SessionConfig) -> Self {
        let reassembler = Reassembler::with_config(&FragmentConfig {
            mtu: config.mtu,
            max_message_size: config.max_response_size,
        });
        Self {
            device,
            config,
            state: State::Idle,
            pending: None,
            reassembler,
            deadline: None,
            write_outstanding: false,
            stale_acks: 0,
        }
    }

    /// Begin an exchange.
    ///
    /// Encodes `message`, fragments it for the link MTU and writes the first
    /// frame. `continuation` runs exactly once when the exchange ends, on
    /// whichever path ends it first. A refused start hands the message back
    /// in [`Rejected`] and never runs the continuation.
    ///
    /// A write that fails synchronously is not a refusal: the exchange was
    /// accepted, and the continuation runs with a transport error before this
    /// returns.
    pub fn start<F>(&mut self, message: ProtocolMessage, continuation: F) -> Result<(), Rejected>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        if self.pending.is_some() {
            return Err(Rejected {
                error: SessionError::Busy,
                message,
            });
        }

        if !self.device.is_paired() {
            match self.config.pairing_policy {
                PairingPolicy::Warn => {
                    warn!(address = self.device.address(), "device is not paired, sending anyway");
                }
                PairingPolicy::Require => {
                    return Err(Rejected {
                        error: SessionError::NotPaired(self.device.address().to_string()),
                        message,
                    });
                }
            }
        }

        let cursor = match self.prepare(&message) {
            Ok(cursor) => cursor,
            Err(error) => return Err(Rejected { error, message }),
        };

        info!(
            address = self.device.address(),
            operation = %message.operation(),
            frames = cursor.frame_count(),
            "exchange started"
        );

        self.reassembler.reset();
        self.pending = Some(Pending {
            message,
            cursor,
            continuation: Box::new(continuation),
        });
        self.state = State::Sending;
        self.send_next();
        Ok(())
    }

    /// Begin an exchange and receive its completion through a channel.
    pub fn submit(
        &mut self,
        message: ProtocolMessage,
    ) -> Result<oneshot::Receiver<Completion>, Rejected> {
        let (tx, rx) = oneshot::channel();
        self.start(message, move |completion| {
            // The receiver may have been dropped; nobody is left to tell.
            let _ = tx.send(completion);
        })?;
        Ok(rx)
    }

    fn prepare(&self, message: &ProtocolMessage) -> crate::Result<Fragmenter> {
        let apdu = message.encode_request()?;
        let mtu = match self.device.mtu() {
            0 => self.config.mtu,
            mtu => mtu,
        };
        let config = FragmentConfig {
            mtu,
            ..FragmentConfig::default()
        };
        Ok(Fragmenter::with_config(MSG, apdu, config)?)
    }

    /// Feed one event from the link.
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::WriteAck(result) => self.on_write_ack(result),
            LinkEvent::Notify(frame) => self.on_notify(&frame),
            LinkEvent::NotifyFailed(err) => self.on_notify_failed(err),
        }
    }

    /// A frame write was acknowledged, successfully or not.
    pub fn on_write_ack(&mut self, result: u2fble_transport::Result<()>) {
        if self.stale_acks > 0 {
            self.stale_acks -= 1;
            debug!(ok = result.is_ok(), "dropping ack for finished exchange");
            return;
        }
        if self.state != State::Sending {
            warn!(state = %self.state, "unexpected write ack");
            return;
        }
        self.write_outstanding = false;

        match result {
            Ok(()) => self.send_next(),
            Err(err) => self.fail(ExchangeError::Transport(err)),
        }
    }

    /// One notification frame arrived.
    pub fn on_notify(&mut self, frame: &[u8]) {
        if self.state != State::AwaitingResponse {
            debug!(state = %self.state, len = frame.len(), "dropping notification");
            return;
        }

        let message = match self.reassembler.push(frame) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(err) => return self.fail(ExchangeError::Frame(err)),
        };

        match message.command {
            MSG => self.complete(&message.payload),
            KEEPALIVE => {
                let status = message.payload.first().copied().unwrap_or_default();
                if status == KEEPALIVE_UP_NEEDED {
                    info!(address = self.device.address(), "touch the authenticator");
                }
                debug!(status, "keepalive, deadline re-armed");
                self.arm_deadline();
            }
            ERROR => {
                let code = message.payload.first().copied().unwrap_or_default();
                warn!(address = self.device.address(), code, "device error frame");
                self.fail(ExchangeError::Device(code));
            }
            other => {
                warn!(command = command_name(other), "ignoring unexpected response command");
            }
        }
    }

    /// The notification subscription failed.
    pub fn on_notify_failed(&mut self, err: TransportError) {
        if self.pending.is_none() {
            warn!(error = %err, "notification failure with no pending exchange");
            return;
        }
        self.fail(ExchangeError::Transport(err));
    }

    /// The link event source is gone; no acknowledgement or notification
    /// can arrive any more.
    pub fn on_link_closed(&mut self) {
        if self.pending.is_some() {
            self.fail(ExchangeError::Transport(TransportError::Closed));
        }
    }

    /// Fire the timeout if the deadline has passed. Returns true if it did.
    pub fn poll_timeout(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if self.state == State::AwaitingResponse && Instant::now() >= deadline => {
                warn!(
                    address = self.device.address(),
                    timeout = ?self.config.response_timeout,
                    "response timed out"
                );
                self.fail(ExchangeError::Timeout(self.config.response_timeout));
                true
            }
            _ => false,
        }
    }

    /// Abandon the pending exchange.
    ///
    /// The continuation runs once with [`ExchangeError::Cancelled`] and the
    /// slot is free again on return. Acks and notifications that belong to
    /// the cancelled exchange are dropped. Returns false if nothing was
    /// pending.
    pub fn cancel(&mut self) -> bool {
        if self.pending.is_none() {
            return false;
        }
        info!(address = self.device.address(), "exchange cancelled");
        self.fail(ExchangeError::Cancelled);
        true
    }

    fn send_next(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        let Some(frame) = pending.cursor.next() else {
            debug!(address = self.device.address(), "request sent, awaiting response");
            self.state = State::AwaitingResponse;
            self.arm_deadline();
            return;
        };

        debug!(len = frame.len(), remaining = pending.cursor.remaining_frames(), "writing frame");
        match self.device.write(&frame) {
            Ok(()) => self.write_outstanding = true,
            Err(err) => self.fail(ExchangeError::Transport(err)),
        }
    }

    fn arm_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.config.response_timeout);
    }

    fn complete(&mut self, apdu: &Bytes) {
        self.state = State::Completing;
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        let outcome = match pending.message.apply_response(apdu) {
            Ok(status) => ExchangeOutcome::Status(status),
            Err(err) => {
                self.state = State::Error;
                ExchangeOutcome::Failed(ExchangeError::Protocol(err))
            }
        };
        self.finish(pending, outcome);
    }

    fn fail(&mut self, error: ExchangeError) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.state = State::Error;
        self.finish(pending, ExchangeOutcome::Failed(error));
    }

    fn finish(&mut self, pending: Pending, outcome: ExchangeOutcome) {
        match &outcome {
            ExchangeOutcome::Status(status) => info!(
                address = self.device.address(),
                operation = %pending.message.operation(),
                %status,
                "exchange completed"
            ),
            ExchangeOutcome::Failed(err) => info!(
                address = self.device.address(),
                operation = %pending.message.operation(),
                state = %self.state,
                error = %err,
                "exchange failed"
            ),
        }

        if self.write_outstanding {
            self.write_outstanding = false;
            self.stale_acks += 1;
        }
        self.reassembler.reset();
        self.deadline = None;
        self.state = State::Idle;
        (pending.continuation)(Completion {
            outcome,
            message: pending.message,
        });
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// True while an exchange holds the slot.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending exchange times out, once the request is fully sent.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D> fmt::Debug for ExchangeSession<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSession")
            .field("state", &self.state)
            .field("busy", &self.pending.is_some())
            .field("deadline", &self.deadline)
            .field("write_outstanding", &self.write_outstanding)
            .field("stale_acks", &self.stale_acks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use u2fble_frame::{fragment, Reassembler};
    use u2fble_protocol::{AuthControl, ProtocolError};
    use u2fble_transport::{LinkEventReceiver, MemoryDevice, MemoryRemote};

    use super::*;

    type Completions = Arc<Mutex<Vec<Completion>>>;

    fn recorder() -> (Completions, impl FnOnce(Completion) + Send + 'static) {
        let done = Completions::default();
        let sink = Arc::clone(&done);
        (done, move |c: Completion| sink.lock().unwrap().push(c))
    }

    fn pump(session: &mut ExchangeSession<MemoryDevice>, rx: &mut LinkEventReceiver) {
        while let Ok(event) = rx.try_recv() {
            session.handle_event(event);
        }
    }

    fn version_request() -> ProtocolMessage {
        let mut msg = ProtocolMessage::new();
        msg.set_version().unwrap();
        msg
    }

    fn register_request() -> ProtocolMessage {
        let mut msg = ProtocolMessage::new();
        msg.set_register().unwrap();
        msg.set_challenge(&[0; 32]).unwrap();
        msg.set_appid(&[1; 32]).unwrap();
        msg
    }

    fn reply(remote: &MemoryRemote, command: u8, payload: &[u8]) {
        for frame in fragment(command, payload, 20).unwrap() {
            remote.notify(frame).unwrap();
        }
    }

    fn setup() -> (ExchangeSession<MemoryDevice>, MemoryRemote, LinkEventReceiver) {
        let (device, remote, rx) = MemoryDevice::new("AA:BB:CC", 20);
        (ExchangeSession::new(device), remote, rx)
    }

    fn single(done: &Completions) -> Completion {
        let mut done = done.lock().unwrap();
        assert_eq!(done.len(), 1, "continuation must run exactly once");
        done.pop().unwrap()
    }

    #[test]
    fn version_exchange_completes() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        assert_eq!(session.state(), State::Sending);
        pump(&mut session, &mut rx);
        assert_eq!(session.state(), State::AwaitingResponse);
        assert!(session.deadline().is_some());

        reply(&remote, MSG, b"U2F_V2\x90\x00");
        pump(&mut session, &mut rx);

        let completion = single(&done);
        assert!(completion.outcome.is_success());
        assert_eq!(completion.message.version(), Some("U2F_V2"));
        assert_eq!(session.state(), State::Idle);
        assert!(!session.is_busy());
        assert!(session.deadline().is_none());
    }

    #[test]
    fn frames_are_written_one_ack_at_a_time() {
        let (mut session, remote, mut rx) = setup();
        let (_done, on_done) = recorder();
        let apdu = register_request().encode_request().unwrap();

        session.start(register_request(), on_done).unwrap();
        assert_eq!(remote.written().len(), 1);

        session.handle_event(rx.try_recv().unwrap());
        assert_eq!(remote.written().len(), 2);

        pump(&mut session, &mut rx);
        let written = remote.written();
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|f| f.len() <= 20));
        assert_eq!(session.state(), State::AwaitingResponse);

        let mut r = Reassembler::new();
        let request = written.iter().find_map(|f| r.push(f).unwrap()).unwrap();
        assert_eq!(request.command, MSG);
        assert_eq!(request.payload, apdu);
    }

    #[test]
    fn second_start_is_rejected_while_busy() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();
        session.start(version_request(), on_done).unwrap();

        let (other_done, other) = recorder();
        let rejected = session.start(register_request(), other).unwrap_err();

        assert!(matches!(rejected.error, SessionError::Busy));
        assert_eq!(rejected.message, register_request());
        assert!(other_done.lock().unwrap().is_empty());
        assert!(done.lock().unwrap().is_empty());
        assert_eq!(session.state(), State::Sending);

        pump(&mut session, &mut rx);
        reply(&remote, MSG, b"U2F_V2\x90\x00");
        pump(&mut session, &mut rx);

        let completion = single(&done);
        assert!(completion.outcome.is_success());
        assert_eq!(completion.message.version(), Some("U2F_V2"));
        assert!(other_done.lock().unwrap().is_empty());
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn encode_failure_rejects_start() {
        let (mut session, remote, _rx) = setup();
        let mut msg = ProtocolMessage::new();
        msg.set_register().unwrap();

        let rejected = session.start(msg, |_| panic!("must not run")).unwrap_err();
        assert!(matches!(
            rejected.error,
            SessionError::Protocol(ProtocolError::MissingField("challenge"))
        ));
        assert!(remote.written().is_empty());
        assert!(!session.is_busy());
    }

    #[test]
    fn unpaired_device_policy() {
        let (device, remote, _rx) = MemoryDevice::new("AA:BB:CC", 20);
        remote.set_paired(false);
        let config = SessionConfig {
            pairing_policy: PairingPolicy::Require,
            ..SessionConfig::default()
        };
        let mut strict = ExchangeSession::with_config(device, config);
        let rejected = strict.start(version_request(), |_| {}).unwrap_err();
        assert!(matches!(rejected.error, SessionError::NotPaired(ref a) if a == "AA:BB:CC"));
        assert!(remote.written().is_empty());

        let (device, remote, _rx) = MemoryDevice::new("AA:BB:CC", 20);
        remote.set_paired(false);
        let mut lenient = ExchangeSession::new(device);
        lenient.start(version_request(), |_| {}).unwrap();
        assert_eq!(remote.written().len(), 1);
    }

    #[test]
    fn refused_write_completes_with_transport_error() {
        let (mut session, remote, _rx) = setup();
        let (done, on_done) = recorder();
        remote.refuse_next_write();

        session.start(version_request(), on_done).unwrap();

        let completion = single(&done);
        assert!(matches!(
            completion.outcome,
            ExchangeOutcome::Failed(ExchangeError::Transport(TransportError::Write { .. }))
        ));
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn failed_ack_completes_with_transport_error() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();
        remote.fail_next_ack();

        session.start(register_request(), on_done).unwrap();
        pump(&mut session, &mut rx);

        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Transport(_))
        ));
        assert_eq!(remote.written().len(), 1);
    }

    #[test]
    fn notify_failure_completes_with_transport_error() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        pump(&mut session, &mut rx);
        remote.notify_failed("unsubscribed").unwrap();
        pump(&mut session, &mut rx);

        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Transport(TransportError::Notify { .. }))
        ));
    }

    #[test]
    fn disconnect_fails_exchange_and_next_start() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        pump(&mut session, &mut rx);
        remote.disconnect().unwrap();
        pump(&mut session, &mut rx);

        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Transport(TransportError::Disconnected(_)))
        ));

        let (next_done, next) = recorder();
        session.start(version_request(), next).unwrap();
        assert!(matches!(
            single(&next_done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Transport(TransportError::Disconnected(_)))
        ));
        assert!(!session.is_busy());
    }

    #[test]
    fn notification_while_sending_is_dropped() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();
        remote.hold_acks();

        session.start(version_request(), on_done).unwrap();
        reply(&remote, MSG, b"U2F_V2\x90\x00");
        pump(&mut session, &mut rx);
        assert_eq!(session.state(), State::Sending);
        assert!(done.lock().unwrap().is_empty());

        remote.release_acks().unwrap();
        pump(&mut session, &mut rx);
        assert_eq!(session.state(), State::AwaitingResponse);
    }

    #[test]
    fn status_error_is_delivered_as_status() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(register_request(), on_done).unwrap();
        pump(&mut session, &mut rx);
        reply(&remote, MSG, &[0x69, 0x85]);
        pump(&mut session, &mut rx);

        let completion = single(&done);
        assert_eq!(
            completion.outcome.status(),
            Some(StatusWord::CONDITIONS_NOT_SATISFIED)
        );
        assert!(!completion.outcome.is_success());
        assert!(completion.message.public_key().is_none());
    }

    #[test]
    fn undecodable_response_is_a_protocol_failure() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        pump(&mut session, &mut rx);
        reply(&remote, MSG, &[0x90]);
        pump(&mut session, &mut rx);

        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Protocol(ProtocolError::Truncated { .. }))
        ));
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn bad_fragment_is_a_frame_failure() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        pump(&mut session, &mut rx);
        remote.notify(vec![0x00, 0x90, 0x00]).unwrap();
        pump(&mut session, &mut rx);

        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Frame(_))
        ));
    }

    #[test]
    fn device_error_frame_fails_exchange() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        pump(&mut session, &mut rx);
        reply(&remote, ERROR, &[0x7f]);
        pump(&mut session, &mut rx);

        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Device(0x7f))
        ));
    }

    #[test]
    fn cancel_releases_slot_and_drops_stale_ack() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();
        remote.hold_acks();

        session.start(register_request(), on_done).unwrap();
        assert!(session.cancel());
        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Cancelled)
        ));
        assert!(!session.is_busy());
        assert!(!session.cancel());

        remote.release_acks().unwrap();
        remote.take_written();
        let (next_done, next) = recorder();
        session.start(version_request(), next).unwrap();
        pump(&mut session, &mut rx);

        // the held ack belonged to the cancelled exchange
        assert_eq!(session.state(), State::AwaitingResponse);
        assert_eq!(remote.written().len(), 1);

        reply(&remote, MSG, b"U2F_V2\x90\x00");
        pump(&mut session, &mut rx);
        assert!(single(&next_done).outcome.is_success());
        assert!(done.lock().unwrap().is_empty());
    }

    #[test]
    fn ack_of_failed_exchange_does_not_leak_into_next() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();
        remote.hold_acks();
        remote.fail_next_ack();

        session.start(register_request(), on_done).unwrap();
        remote.notify_failed("unsubscribed").unwrap();
        pump(&mut session, &mut rx);
        assert_eq!(session.state(), State::Idle);
        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Transport(TransportError::Notify { .. }))
        ));

        remote.release_acks().unwrap();
        remote.take_written();
        let (next_done, next) = recorder();
        session.start(version_request(), next).unwrap();
        pump(&mut session, &mut rx);

        // the failed ack was owed to the first exchange
        assert_eq!(session.state(), State::AwaitingResponse);
        assert!(next_done.lock().unwrap().is_empty());

        reply(&remote, MSG, b"U2F_V2\x90\x00");
        pump(&mut session, &mut rx);
        let completion = single(&next_done);
        assert!(completion.outcome.is_success());
        assert_eq!(completion.message.version(), Some("U2F_V2"));
    }

    #[test]
    fn late_notification_after_cancel_is_dropped() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        pump(&mut session, &mut rx);
        session.cancel();
        reply(&remote, MSG, b"U2F_V2\x90\x00");
        pump(&mut session, &mut rx);

        let completion = single(&done);
        assert!(matches!(
            completion.outcome,
            ExchangeOutcome::Failed(ExchangeError::Cancelled)
        ));
        assert!(completion.message.version().is_none());
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn zero_mtu_falls_back_to_configured_mtu() {
        let (device, remote, mut rx) = MemoryDevice::new("AA:BB:CC", 0);
        let config = SessionConfig {
            mtu: 8,
            ..SessionConfig::default()
        };
        let mut session = ExchangeSession::with_config(device, config);

        session.start(register_request(), |_| {}).unwrap();
        pump(&mut session, &mut rx);

        let written = remote.written();
        assert!(written.iter().all(|f| f.len() <= 8));
        assert_eq!(written.len(), 1 + (70 - 5usize).div_ceil(7));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_armed_after_last_ack() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();
        remote.hold_acks();

        session.start(version_request(), on_done).unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(session.deadline().is_none());
        assert!(!session.poll_timeout());

        remote.release_acks().unwrap();
        pump(&mut session, &mut rx);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!session.poll_timeout());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(session.poll_timeout());
        assert!(!session.poll_timeout());

        assert!(matches!(
            single(&done).outcome,
            ExchangeOutcome::Failed(ExchangeError::Timeout(t)) if t == Duration::from_secs(30)
        ));
        assert_eq!(session.state(), State::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_rearms_deadline() {
        let (mut session, remote, mut rx) = setup();
        let (done, on_done) = recorder();

        session.start(version_request(), on_done).unwrap();
        pump(&mut session, &mut rx);

        tokio::time::advance(Duration::from_secs(20)).await;
        reply(&remote, KEEPALIVE, &[KEEPALIVE_UP_NEEDED]);
        pump(&mut session, &mut rx);
        assert_eq!(session.state(), State::AwaitingResponse);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!session.poll_timeout());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(session.poll_timeout());
        assert_eq!(done.lock().unwrap().len(), 1);
    }

    #[test]
    fn authenticate_request_carries_control_byte() {
        let (mut session, remote, mut rx) = setup();
        let mut msg = ProtocolMessage::new();
        msg.set_authenticate(AuthControl::CheckOnly).unwrap();
        msg.set_challenge(&[0; 32]).unwrap();
        msg.set_appid(&[0; 32]).unwrap();
        msg.set_keyhandle(&[9; 64]).unwrap();

        session.start(msg, |_| {}).unwrap();
        pump(&mut session, &mut rx);

        let written = remote.written();
        assert_eq!(&written[0][3..6], &[0x00, 0x02, 0x07]);
    }
}
