use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Where the client currently sits in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Hello,
    Identifying,
    Resuming,
    Ready,
    Closing,
}

/// Session bookkeeping owned by the gateway read loop. Only the reader task
/// mutates this; the heartbeat task sees the session through
/// [`SharedSession`].
#[derive(Debug, Default)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub resume_gateway_url: Option<String>,
    pub phase: Phase,
}

impl SessionState {
    /// A RESUME needs all three of session id, resume URL and a sequence.
    pub fn can_resume(&self, shared: &SharedSession) -> bool {
        self.session_id.is_some()
            && self.resume_gateway_url.is_some()
            && shared.last_sequence().is_some()
    }

    /// Hard reset before a fresh IDENTIFY. The sequence may only be cleared
    /// together with the session id.
    pub fn reset(&mut self, shared: &SharedSession) {
        self.session_id = None;
        self.resume_gateway_url = None;
        shared.clear_sequence();
    }
}

/// The slice of session state the heartbeat task reads: the last sequence
/// (carried in every heartbeat) and the ACK handshake.
#[derive(Debug)]
pub struct SharedSession {
    /// Last DISPATCH sequence; -1 means none seen yet.
    last_sequence: AtomicI64,
    /// True while no heartbeat is awaiting its ACK.
    heartbeat_acked: AtomicBool,
    /// Set by the heartbeat task when an ACK never arrived.
    zombied: AtomicBool,
}

impl SharedSession {
    pub fn new() -> Self {
        Self {
            last_sequence: AtomicI64::new(-1),
            heartbeat_acked: AtomicBool::new(true),
            zombied: AtomicBool::new(false),
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        let seq = self.last_sequence.load(Ordering::Acquire);
        (seq >= 0).then_some(seq as u64)
    }

    /// Record a DISPATCH sequence. `fetch_max` keeps the stored value
    /// monotonic even if the server replays a lower sequence.
    pub fn record_sequence(&self, seq: u64) {
        self.last_sequence.fetch_max(seq as i64, Ordering::AcqRel);
    }

    pub fn clear_sequence(&self) {
        self.last_sequence.store(-1, Ordering::Release);
    }

    /// Claim the ACK slot for a new heartbeat. Returns false when the
    /// previous heartbeat is still unacknowledged, i.e. the link is zombied.
    pub fn begin_heartbeat(&self) -> bool {
        self.heartbeat_acked.swap(false, Ordering::AcqRel)
    }

    pub fn record_ack(&self) {
        self.heartbeat_acked.store(true, Ordering::Release);
    }

    pub fn mark_zombied(&self) {
        self.zombied.store(true, Ordering::Release);
    }

    /// Clear the ACK handshake at the start of a connection attempt.
    pub fn reset_for_connection(&self) {
        self.heartbeat_acked.store(true, Ordering::Release);
        self.zombied.store(false, Ordering::Release);
    }
}

impl Default for SharedSession {
    fn default() -> Self {
        Self::new()
    }
}
