//! Error taxonomy for the transport.
//!
//! `TransportError` is what a caller awaiting a response can see.
//! `ChunkError` never leaves the receive path: the offending chunk set is
//! dropped and the error is logged.

use thiserror::Error;
use uuid::Uuid;

// ── Caller-visible ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No matching response arrived before the deadline.
    #[error("request timed out")]
    Timeout,

    /// Explicit cancellation, connection loss, or transport shutdown.
    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    /// Submit after `close()`.
    #[error("transport is closed")]
    TransportClosed,

    /// The peer kept answering busy and the retry budget ran out.
    #[error("peer busy, retries exhausted")]
    PeerBusy,

    /// The peer answered the request with an error response.
    #[error("peer error: {error}")]
    Peer {
        error: String,
        details: Option<String>,
    },

    /// A correlated payload must be a JSON object to carry `request_id`.
    #[error("payload is not a JSON object: {0}")]
    InvalidPayload(String),

    /// The connection capability refused a frame.
    #[error("connection error: {0}")]
    Connection(String),
}

impl TransportError {
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }
}

// ── Receive path ──────────────────────────────────────────────────────────────

/// A malformed chunk set. The whole set for `msg_id` is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("chunk set {msg_id}: total_chunks {got} disagrees with {expected}")]
    TotalMismatch { msg_id: Uuid, expected: u32, got: u32 },

    #[error("chunk set {msg_id}: index {index} re-sent with different data")]
    ConflictingDuplicate { msg_id: Uuid, index: u32 },

    #[error("chunk set {msg_id}: index {index} out of range for {total} chunks")]
    IndexOutOfRange { msg_id: Uuid, index: u32, total: u32 },

    #[error("chunk set {msg_id}: total_chunks is zero")]
    ZeroTotal { msg_id: Uuid },

    #[error("chunk set {msg_id}: missing index {index}")]
    Incomplete { msg_id: Uuid, index: u32 },

    #[error("chunk set is empty")]
    Empty,
}
