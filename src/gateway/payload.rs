use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Gateway wire frame: `{op, d, s, t}`. `s` and `t` are only present on
/// DISPATCH frames; `d` is opaque and passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Gateway opcodes (protocol v10).
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Close codes the gateway may send, plus the standard WebSocket codes the
/// policy below cares about.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const UNKNOWN_ERROR: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTH_FAILED: u16 = 4004;
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    pub const INVALID_SEQ: u16 = 4007;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMED_OUT: u16 = 4009;
    pub const INVALID_SHARD: u16 = 4010;
    pub const SHARDING_REQUIRED: u16 = 4011;
    pub const INVALID_VERSION: u16 = 4012;
    pub const INVALID_INTENTS: u16 = 4013;
    pub const DISALLOWED_INTENTS: u16 = 4014;
}

/// Close codes that end the process: the session can never become valid by
/// retrying (bad token, bad intents, bad shard or API version).
pub fn is_fatal(code: u16) -> bool {
    matches!(
        code,
        close_code::AUTH_FAILED
            | close_code::INVALID_SHARD
            | close_code::SHARDING_REQUIRED
            | close_code::INVALID_VERSION
            | close_code::INVALID_INTENTS
            | close_code::DISALLOWED_INTENTS
    )
}

/// Close codes after which the stored session may be RESUMEd. Everything
/// that is neither fatal nor resumable reconnects with a fresh IDENTIFY.
pub fn is_resumable(code: u16) -> bool {
    matches!(
        code,
        close_code::NORMAL
            | close_code::GOING_AWAY
            | close_code::UNKNOWN_ERROR
            | close_code::UNKNOWN_OPCODE
            | close_code::DECODE_ERROR
            | close_code::NOT_AUTHENTICATED
            | close_code::ALREADY_AUTHENTICATED
            | close_code::INVALID_SEQ
            | close_code::RATE_LIMITED
            | close_code::SESSION_TIMED_OUT
    )
}

/// Human-readable reason for a fatal close code.
pub fn fatal_reason(code: u16) -> &'static str {
    match code {
        close_code::AUTH_FAILED => "authentication failed",
        close_code::INVALID_SHARD => "invalid shard",
        close_code::SHARDING_REQUIRED => "sharding required",
        close_code::INVALID_VERSION => "invalid API version",
        close_code::INVALID_INTENTS => "invalid intents",
        close_code::DISALLOWED_INTENTS => "disallowed intents",
        _ => "unknown",
    }
}

/// HELLO (opcode 10) data.
#[derive(Debug, Deserialize)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

/// The subset of READY data the bridge keeps for session bookkeeping.
#[derive(Debug, Deserialize)]
pub struct ReadyData {
    pub session_id: String,
    pub resume_gateway_url: String,
}

/// IDENTIFY (opcode 2) frame. Sent exactly once per non-resume connection.
pub fn identify(token: &str, intents: u64) -> Value {
    json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "discord-bridge",
                "device": "discord-bridge",
            },
        },
    })
}

/// RESUME (opcode 6) frame.
pub fn resume(token: &str, session_id: &str, seq: u64) -> Value {
    json!({
        "op": opcode::RESUME,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": seq,
        },
    })
}

/// HEARTBEAT (opcode 1) frame. `d` is the last seen sequence, or null
/// before the first DISPATCH.
pub fn heartbeat(last_sequence: Option<u64>) -> Value {
    json!({
        "op": opcode::HEARTBEAT,
        "d": last_sequence,
    })
}
