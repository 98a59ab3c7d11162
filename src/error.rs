use std::fmt;

/// Errors that terminate the bridge.
///
/// Transient gateway faults (network drops, non-fatal close codes, zombied
/// heartbeats) are handled inside the gateway client and never become a
/// `BridgeError`; forwarding failures are logged and absorbed by the
/// forwarder. What remains is configuration problems at startup and the
/// fatal gateway close codes.
#[derive(Debug)]
pub enum BridgeError {
    Config(String),
    GatewayFatal { code: u16, reason: String },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Config(msg) => write!(f, "configuration error: {msg}"),
            BridgeError::GatewayFatal { code, reason } => {
                write!(f, "gateway closed with fatal code {code}: {reason}")
            }
        }
    }
}

impl std::error::Error for BridgeError {}
