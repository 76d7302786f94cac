use tokio::time::{sleep_until, Instant};
use tracing::debug;
use u2fble_protocol::ProtocolMessage;
use u2fble_transport::{DeviceHandle, LinkEventReceiver};

use crate::error::{Result, SessionError};
use crate::session::{Completion, ExchangeSession};

/// Run the pending exchange to completion.
///
/// Link events are fed to the session in arrival order and the response
/// deadline is served by a tokio timer. Returns once the slot is free,
/// immediately if nothing is pending. A closed event channel fails the
/// exchange with a transport error.
pub async fn drive<D: DeviceHandle>(
    session: &mut ExchangeSession<D>,
    events: &mut LinkEventReceiver,
) {
    while session.is_busy() {
        let deadline = session.deadline();
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => session.handle_event(event),
                None => {
                    debug!("link event channel closed");
                    session.on_link_closed();
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                session.poll_timeout();
            }
        }
    }
}

/// Submit `message` and drive the exchange until it completes.
pub async fn exchange<D: DeviceHandle>(
    session: &mut ExchangeSession<D>,
    events: &mut LinkEventReceiver,
    message: ProtocolMessage,
) -> Result<Completion> {
    let completion = session.submit(message)?;
    drive(session, events).await;
    completion.await.map_err(|_| SessionError::Abandoned)
}
