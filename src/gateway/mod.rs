pub mod heartbeat;
pub mod payload;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::DiscordConfig;
use crate::error::BridgeError;
use payload::{opcode, GatewayPayload, HelloData, ReadyData};
use session::{Phase, SessionState, SharedSession};

/// Default gateway URL; READY supplies a different one for resumes.
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg";
const API_VERSION: u8 = 10;
const ENCODING: &str = "json";

/// How long to wait for the server's HELLO before abandoning a connection.
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A DISPATCH event as handed to the router: the `t` and `d` fields of the
/// wire frame, untouched.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub name: String,
    pub data: Value,
}

/// How a single connection ended, deciding what the connect loop does next.
#[derive(Debug)]
enum ConnectionEnd {
    /// Graceful shutdown was requested; stop for good.
    Shutdown,
    /// A fatal close code; surfaces to the supervisor.
    Fatal { code: u16, reason: String },
    /// Transient failure with session state intact; reconnect and RESUME.
    Resume,
    /// Session state is no longer valid; reconnect with a fresh IDENTIFY.
    Reidentify,
}

/// Discord Gateway client: maintains one session, heartbeats it, resumes it
/// across drops and emits DISPATCH events in wire order.
pub struct GatewayClient {
    config: DiscordConfig,
    session: SessionState,
    shared: Arc<SharedSession>,
    events: mpsc::UnboundedSender<DispatchEvent>,
    gateway_url: String,
    backoff_attempt: u32,
}

impl GatewayClient {
    pub fn new(config: DiscordConfig, events: mpsc::UnboundedSender<DispatchEvent>) -> Self {
        Self {
            config,
            session: SessionState::default(),
            shared: Arc::new(SharedSession::new()),
            events,
            gateway_url: GATEWAY_URL.to_string(),
            backoff_attempt: 0,
        }
    }

    /// Point the client at a different gateway URL (tests).
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    /// Run until shutdown is signalled or a fatal close code arrives.
    /// Everything else reconnects with exponential full-jitter backoff.
    pub async fn run(&mut self, shutdown: &broadcast::Sender<()>) -> Result<(), BridgeError> {
        let mut rx = shutdown.subscribe();
        loop {
            match self.connect_once(&mut rx).await {
                ConnectionEnd::Shutdown => {
                    self.session.phase = Phase::Disconnected;
                    return Ok(());
                }
                ConnectionEnd::Fatal { code, reason } => {
                    self.session.phase = Phase::Disconnected;
                    return Err(BridgeError::GatewayFatal { code, reason });
                }
                ConnectionEnd::Resume => {}
                ConnectionEnd::Reidentify => self.session.reset(&self.shared),
            }
            self.session.phase = Phase::Disconnected;

            let delay = backoff_delay(self.backoff_attempt);
            self.backoff_attempt = self.backoff_attempt.saturating_add(1);
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting to gateway");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = rx.recv() => return Ok(()),
            }
        }
    }

    /// One full connection attempt: connect, HELLO, identify or resume,
    /// then pump events until the connection ends one way or another.
    async fn connect_once(&mut self, rx: &mut broadcast::Receiver<()>) -> ConnectionEnd {
        self.shared.reset_for_connection();
        self.session.phase = Phase::Connecting;

        let resuming = self.session.can_resume(&self.shared);
        let base = if resuming {
            self.session
                .resume_gateway_url
                .clone()
                .unwrap_or_else(|| self.gateway_url.clone())
        } else {
            self.gateway_url.clone()
        };
        let url = format!("{base}/?v={API_VERSION}&encoding={ENCODING}");

        tracing::info!(url = %url, resuming, "connecting to gateway");
        let ws = tokio::select! {
            result = connect_async(&url) => match result {
                Ok((ws, _)) => ws,
                Err(e) => {
                    tracing::warn!("gateway connect failed: {e}");
                    return ConnectionEnd::Resume;
                }
            },
            _ = rx.recv() => return ConnectionEnd::Shutdown,
        };
        let (mut ws_sink, mut ws_stream) = ws.split();

        // HELLO must arrive before anything else happens on the connection.
        self.session.phase = Phase::Hello;
        let hello = tokio::select! {
            result = tokio::time::timeout(HELLO_TIMEOUT, next_payload(&mut ws_stream)) => {
                match result {
                    Ok(Some(p)) if p.op == opcode::HELLO => p,
                    Ok(Some(p)) => {
                        tracing::warn!(op = p.op, "expected HELLO, got another opcode");
                        return ConnectionEnd::Resume;
                    }
                    Ok(None) => {
                        tracing::warn!("connection closed before HELLO");
                        return ConnectionEnd::Resume;
                    }
                    Err(_) => {
                        tracing::warn!("timed out waiting for HELLO");
                        return ConnectionEnd::Resume;
                    }
                }
            }
            _ = rx.recv() => return ConnectionEnd::Shutdown,
        };
        let interval = match hello
            .d
            .and_then(|d| serde_json::from_value::<HelloData>(d).ok())
        {
            Some(data) => Duration::from_millis(data.heartbeat_interval),
            None => {
                tracing::warn!("HELLO carried no heartbeat_interval");
                return ConnectionEnd::Resume;
            }
        };
        tracing::info!(interval_ms = interval.as_millis() as u64, "received HELLO");

        // Single send lane: every outbound frame goes through one writer so
        // heartbeats and IDENTIFY/RESUME frames never interleave.
        let (lane, mut lane_rx) = mpsc::unbounded_channel::<Message>();
        let mut writer = tokio::spawn(async move {
            while let Some(frame) = lane_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if ws_sink.send(frame).await.is_err() || closing {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });
        let heartbeat_task =
            tokio::spawn(heartbeat::run(interval, self.shared.clone(), lane.clone()));

        let frame = if resuming {
            self.session.phase = Phase::Resuming;
            let session_id = self.session.session_id.clone().unwrap_or_default();
            let seq = self.shared.last_sequence().unwrap_or(0);
            tracing::info!(session_id = %session_id, seq, "resuming gateway session");
            payload::resume(&self.config.token, &session_id, seq)
        } else {
            self.session.phase = Phase::Identifying;
            tracing::info!("identifying with the gateway");
            payload::identify(&self.config.token, self.config.intents)
        };
        let _ = lane.send(Message::Text(frame.to_string().into()));

        let end = loop {
            tokio::select! {
                _ = rx.recv() => {
                    self.session.phase = Phase::Closing;
                    tracing::info!("closing gateway connection");
                    let _ = lane.send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "shutting down".into(),
                    })));
                    break ConnectionEnd::Shutdown;
                }
                frame = ws_stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GatewayPayload>(&text) {
                            Ok(p) => {
                                if let Some(end) = self.handle_payload(p, &lane).await {
                                    break end;
                                }
                            }
                            Err(e) => tracing::warn!("undecodable gateway frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(close))) => {
                        break self.classify_close(close.map(|f| u16::from(f.code)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("gateway stream error: {e}");
                        break ConnectionEnd::Resume;
                    }
                    None => {
                        tracing::warn!("gateway stream ended");
                        break ConnectionEnd::Resume;
                    }
                }
            }
        };

        heartbeat_task.abort();
        drop(lane);
        if tokio::time::timeout(Duration::from_secs(2), &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
        end
    }

    async fn handle_payload(
        &mut self,
        p: GatewayPayload,
        lane: &mpsc::UnboundedSender<Message>,
    ) -> Option<ConnectionEnd> {
        match p.op {
            opcode::DISPATCH => {
                if let Some(seq) = p.s {
                    self.shared.record_sequence(seq);
                }
                let Some(name) = p.t else {
                    tracing::warn!("DISPATCH frame without event name");
                    return None;
                };
                let data = p.d.unwrap_or(Value::Null);
                match name.as_str() {
                    "READY" => match serde_json::from_value::<ReadyData>(data.clone()) {
                        Ok(ready) => {
                            tracing::info!(session_id = %ready.session_id, "gateway session ready");
                            self.session.session_id = Some(ready.session_id);
                            self.session.resume_gateway_url = Some(ready.resume_gateway_url);
                            self.session.phase = Phase::Ready;
                            self.backoff_attempt = 0;
                        }
                        Err(e) => tracing::warn!("malformed READY payload: {e}"),
                    },
                    "RESUMED" => {
                        tracing::info!("gateway session resumed");
                        self.session.phase = Phase::Ready;
                        self.backoff_attempt = 0;
                    }
                    _ => {}
                }
                tracing::debug!(event = %name, "received dispatch");
                let _ = self.events.send(DispatchEvent { name, data });
                None
            }
            opcode::HEARTBEAT => {
                // Server asked for an immediate beat; the scheduler's own
                // cadence is unaffected.
                let beat = payload::heartbeat(self.shared.last_sequence());
                let _ = lane.send(Message::Text(beat.to_string().into()));
                None
            }
            opcode::RECONNECT => {
                tracing::info!("gateway requested reconnect");
                let _ = lane.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "reconnect requested".into(),
                })));
                Some(ConnectionEnd::Resume)
            }
            opcode::INVALID_SESSION => {
                let resumable = p.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                let delay = Duration::from_secs_f64(rand::thread_rng().gen_range(1.0..5.0));
                tracing::warn!(
                    resumable,
                    delay_ms = delay.as_millis() as u64,
                    "gateway invalidated the session"
                );
                tokio::time::sleep(delay).await;
                let frame = if resumable && self.session.can_resume(&self.shared) {
                    self.session.phase = Phase::Resuming;
                    payload::resume(
                        &self.config.token,
                        self.session.session_id.as_deref().unwrap_or_default(),
                        self.shared.last_sequence().unwrap_or(0),
                    )
                } else {
                    self.session.reset(&self.shared);
                    self.session.phase = Phase::Identifying;
                    payload::identify(&self.config.token, self.config.intents)
                };
                let _ = lane.send(Message::Text(frame.to_string().into()));
                None
            }
            opcode::HELLO => {
                tracing::debug!("ignoring HELLO outside the handshake");
                None
            }
            opcode::HEARTBEAT_ACK => {
                self.shared.record_ack();
                tracing::debug!("heartbeat acknowledged");
                None
            }
            other => {
                tracing::debug!(op = other, "ignoring unknown opcode");
                None
            }
        }
    }

    fn classify_close(&self, code: Option<u16>) -> ConnectionEnd {
        match code {
            Some(code) if payload::is_fatal(code) => ConnectionEnd::Fatal {
                code,
                reason: payload::fatal_reason(code).to_string(),
            },
            Some(code) if payload::is_resumable(code) => {
                tracing::warn!(code, "gateway closed, will resume");
                ConnectionEnd::Resume
            }
            Some(code) => {
                tracing::warn!(code, "gateway closed with non-resumable code, will re-identify");
                ConnectionEnd::Reidentify
            }
            // Dropped without a close frame; session state is still good.
            None => {
                tracing::warn!("gateway dropped without a close frame, will resume");
                ConnectionEnd::Resume
            }
        }
    }
}

/// Skip non-text frames until a payload (or the end of the stream) shows up.
async fn next_payload(stream: &mut WsStream) -> Option<GatewayPayload> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                Ok(p) => return Some(p),
                Err(e) => tracing::warn!("undecodable gateway frame: {e}"),
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Full-jitter exponential backoff: uniform over `[0, min(cap, base * 2^n))`.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.as_secs_f64() * 2f64.powi(attempt.min(16) as i32);
    let capped = exp.min(BACKOFF_CAP.as_secs_f64());
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..capped))
}
