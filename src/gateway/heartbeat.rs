use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::payload::{self, close_code};
use super::session::SharedSession;

/// Periodic heartbeat sender. One task per connection, started after HELLO
/// and aborted when the connection ends.
///
/// The first beat fires after a uniform random delay in `[0, interval)` so a
/// fleet of clients does not synchronize against the gateway. Every beat
/// claims the ACK slot first; if the previous beat was never acknowledged
/// the link is considered zombied and a close with code 4000 goes down the
/// send lane, which makes the read loop reconnect and resume.
pub async fn run(
    interval: Duration,
    shared: Arc<SharedSession>,
    lane: mpsc::UnboundedSender<Message>,
) {
    let jitter = interval.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
    tokio::time::sleep(jitter).await;

    loop {
        if !shared.begin_heartbeat() {
            tracing::warn!("heartbeat not acknowledged, closing zombied connection");
            shared.mark_zombied();
            let _ = lane.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(close_code::UNKNOWN_ERROR),
                reason: "heartbeat ack timeout".into(),
            })));
            return;
        }

        let beat = payload::heartbeat(shared.last_sequence());
        if lane.send(Message::Text(beat.to_string().into())).is_err() {
            // Writer is gone; the connection is already tearing down.
            return;
        }
        tracing::debug!("sent heartbeat");

        tokio::time::sleep(interval).await;
    }
}
