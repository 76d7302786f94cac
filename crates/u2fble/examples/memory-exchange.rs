//! VERSION exchange against an in-memory authenticator.
//!
//! Run with:
//!   cargo run -p u2fble --example memory-exchange

use u2fble::frame::{fragment, Reassembler, MSG};
use u2fble::transport::{MemoryDevice, MemoryRemote};
use u2fble::{exchange, ExchangeOutcome, ExchangeSession, ProtocolMessage};

/// Answer the first complete request with `U2F_V2`.
async fn authenticator(remote: MemoryRemote) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut reassembler = Reassembler::new();
    let mut seen = 0;
    loop {
        let written = remote.written();
        for frame in &written[seen..] {
            if let Some(request) = reassembler.push(frame)? {
                eprintln!("authenticator got {} byte request", request.payload.len());
                for frame in fragment(MSG, b"U2F_V2\x90\x00", 20)? {
                    remote.notify(frame)?;
                }
                return Ok(());
            }
        }
        seen = written.len();
        tokio::task::yield_now().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (device, remote, mut events) = MemoryDevice::new("C0:FF:EE:00:00:01", 20);
    let mut session = ExchangeSession::new(device);

    let mut message = ProtocolMessage::new();
    message.set_version()?;

    let responder = tokio::spawn(authenticator(remote));
    let completion = exchange(&mut session, &mut events, message).await?;
    responder.await??;

    match completion.outcome {
        ExchangeOutcome::Status(status) => {
            eprintln!("status {status}");
            println!("{}", completion.message.version().unwrap_or("<none>"));
        }
        ExchangeOutcome::Failed(err) => eprintln!("exchange failed: {err}"),
    }
    Ok(())
}
