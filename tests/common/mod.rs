#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use discord_bridge::config::{BridgeConfig, DiscordConfig, HttpConfig, LoggingConfig, Route};

pub type WsServer = WebSocketStream<TcpStream>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Fake gateway
// ---------------------------------------------------------------------------

/// Bind a listener on port 0 for a fake gateway. Returns it with its ws URL.
pub async fn gateway_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://127.0.0.1:{}", addr.port()))
}

/// Accept the next client connection on the fake gateway.
pub async fn accept_gateway(listener: &TcpListener) -> WsServer {
    let (stream, _) = tokio::time::timeout(RECV_TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for a gateway connection")
        .unwrap();
    accept_async(stream).await.unwrap()
}

pub async fn send_json(ws: &mut WsServer, value: &Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame, parsed. Panics if the peer closes or nothing arrives.
pub async fn recv_json(ws: &mut WsServer) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended while waiting for a frame")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => panic!("connection closed while waiting for a frame"),
            _ => {}
        }
    }
}

/// Wait for the client's close frame, completing the close handshake, and
/// return its code. Heartbeats arriving in between are ignored.
pub async fn recv_close(ws: &mut WsServer) -> Option<u16> {
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a close frame")
        {
            Some(Ok(Message::Close(frame))) => {
                let _ = ws.close(None).await;
                return frame.map(|f| u16::from(f.code));
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

/// Read frames until something other than a heartbeat arrives, ACKing every
/// heartbeat on the way (the client's first beat is jittered and can land
/// before the handshake frame).
pub async fn recv_handshake(ws: &mut WsServer) -> Value {
    loop {
        let frame = recv_json(ws).await;
        if frame["op"] == 1 {
            send_json(ws, &json!({"op": 11})).await;
            continue;
        }
        return frame;
    }
}

/// Send HELLO and return the IDENTIFY or RESUME the client answers with.
pub async fn hello_and_handshake(ws: &mut WsServer, interval_ms: u64) -> Value {
    send_json(ws, &json!({"op": 10, "d": {"heartbeat_interval": interval_ms}})).await;
    recv_handshake(ws).await
}

pub async fn send_ready(ws: &mut WsServer, seq: u64, session_id: &str, resume_url: &str) {
    send_json(
        ws,
        &json!({
            "op": 0,
            "s": seq,
            "t": "READY",
            "d": {
                "v": 10,
                "session_id": session_id,
                "resume_gateway_url": resume_url,
            },
        }),
    )
    .await;
}

pub async fn send_dispatch(ws: &mut WsServer, seq: u64, event: &str, data: Value) {
    send_json(ws, &json!({"op": 0, "s": seq, "t": event, "d": data})).await;
}

// ---------------------------------------------------------------------------
// Recording HTTP sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SinkResponse {
    pub status: u16,
    pub retry_after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub body: Value,
    pub at: Instant,
}

#[derive(Clone)]
struct SinkState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<VecDeque<SinkResponse>>>,
}

/// An HTTP endpoint that records every POST body and answers with the
/// scripted statuses, then 200 once the script runs out.
pub struct RecordingSink {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RecordingSink {
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.body.clone())
            .collect()
    }

    pub fn timestamps(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|r| r.at).collect()
    }
}

pub fn statuses(codes: &[u16]) -> Vec<SinkResponse> {
    codes
        .iter()
        .map(|&status| SinkResponse {
            status,
            retry_after: None,
        })
        .collect()
}

pub async fn spawn_sink(script: &[SinkResponse]) -> RecordingSink {
    let state = SinkState {
        requests: Arc::new(Mutex::new(Vec::new())),
        script: Arc::new(Mutex::new(script.iter().cloned().collect())),
    };
    let requests = Arc::clone(&state.requests);

    let app = Router::new().route("/", post(sink_handler)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    RecordingSink {
        url: format!("http://127.0.0.1:{}/", addr.port()),
        requests,
    }
}

async fn sink_handler(State(state): State<SinkState>, Json(body): Json<Value>) -> Response {
    let next = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(SinkResponse {
            status: 200,
            retry_after: None,
        });
    state.requests.lock().unwrap().push(RecordedRequest {
        body,
        at: Instant::now(),
    });

    let mut response = StatusCode::from_u16(next.status).unwrap().into_response();
    if let Some(after) = next.retry_after {
        response
            .headers_mut()
            .insert("Retry-After", after.parse().unwrap());
    }
    response
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

pub const TEST_TOKEN: &str = "Bot test-token-0123456789";

pub fn bridge_config(retry_attempts: u32, retry_delay: f64, routes: Vec<Route>) -> BridgeConfig {
    BridgeConfig {
        discord: DiscordConfig {
            token: TEST_TOKEN.to_string(),
            intents: 513,
        },
        http: HttpConfig {
            timeout: 5.0,
            retry_attempts,
            retry_delay,
        },
        logging: LoggingConfig::default(),
        routes,
    }
}

pub fn route(event_name: &str, enabled: bool, endpoints: Vec<String>) -> Route {
    Route {
        event_name: event_name.to_string(),
        enabled,
        endpoints,
    }
}

/// Poll until `check` holds, panicking after five seconds.
pub async fn wait_until<F: Fn() -> bool>(check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("condition not met within five seconds");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
