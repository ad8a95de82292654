//! tether wire format: JSON text frames exchanged with the peer.
//!
//! Two kinds of frame travel over the connection:
//!   - unframed messages: the caller's JSON payload, sent as-is
//!   - chunk frames: `{"type":"chunk","msg_id":..,"chunk_index":..,"total_chunks":..,"data":..}`
//!
//! A message that is not a chunk frame is classified exactly once into a
//! `PeerMessage` at the receive boundary. Everything downstream matches on
//! that variant instead of poking at loose JSON fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::TransportError;

/// Field carrying the correlation id in requests and echoed responses.
pub const REQUEST_ID_FIELD: &str = "request_id";

const TYPE_CHUNK: &str = "chunk";
const TYPE_PROCESSING_STATUS: &str = "processing_status";

// ── Chunk frame ───────────────────────────────────────────────────────────────

/// One fragment of an oversized message.
///
/// Invariant: `chunk_index < total_chunks`, and every frame sharing a
/// `msg_id` carries the same `total_chunks`. `chunk_index` is authoritative
/// for ordering, not arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFrame {
    pub msg_id: Uuid,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data: String,
}

impl ChunkFrame {
    /// Encode as one JSON text frame, including the `"type":"chunk"` tag.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "type": TYPE_CHUNK,
            "msg_id": self.msg_id,
            "chunk_index": self.chunk_index,
            "total_chunks": self.total_chunks,
            "data": self.data,
        })
        .to_string()
    }
}

/// A raw inbound text frame, split by whether it is a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Chunk(ChunkFrame),
    Message(String),
}

/// Decode a raw inbound frame.
///
/// Anything that is not tagged `"type":"chunk"` passes through unchanged,
/// including text that is not JSON at all. A frame tagged as a chunk but
/// missing fields is an error.
pub fn decode_inbound(text: String) -> Result<Inbound, serde_json::Error> {
    let value: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => return Ok(Inbound::Message(text)),
    };
    if value.get("type").and_then(Value::as_str) == Some(TYPE_CHUNK) {
        let frame: ChunkFrame = serde_json::from_value(value)?;
        return Ok(Inbound::Chunk(frame));
    }
    Ok(Inbound::Message(text))
}

// ── Status and error signals ──────────────────────────────────────────────────

/// Value of the `status` field in a `processing_status` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusKind {
    Complete,
    Error,
    /// Intermediate progress, e.g. `"processing"`. Does not release the slot.
    Other(String),
}

impl From<String> for StatusKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "complete" => Self::Complete,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<StatusKind> for String {
    fn from(kind: StatusKind) -> Self {
        match kind {
            StatusKind::Complete => "complete".to_string(),
            StatusKind::Error => "error".to_string(),
            StatusKind::Other(s) => s,
        }
    }
}

/// Out-of-band progress signal from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub status: StatusKind,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StatusKind::Complete | StatusKind::Error)
    }
}

/// A peer response carrying an `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default, deserialize_with = "lenient_uuid")]
    pub request_id: Option<Uuid>,
}

impl ErrorResponse {
    /// `status:"busy"` means "not ready, do not release the slot".
    pub fn is_busy(&self) -> bool {
        self.status.as_deref() == Some("busy")
    }
}

fn lenient_uuid<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok()))
}

// ── Classification ────────────────────────────────────────────────────────────

/// A complete inbound message, classified once at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// A normal response or unsolicited message.
    Data {
        request_id: Option<Uuid>,
        text: String,
    },
    Status(ProcessingStatus),
    Error(ErrorResponse),
    /// Not JSON, or a status/error message with the wrong shape.
    Undecodable { text: String, reason: String },
}

impl PeerMessage {
    pub fn classify(text: String) -> Self {
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                return Self::Undecodable {
                    text,
                    reason: e.to_string(),
                }
            }
        };

        if value.get("type").and_then(Value::as_str) == Some(TYPE_PROCESSING_STATUS) {
            return match serde_json::from_value::<ProcessingStatus>(value) {
                Ok(status) => Self::Status(status),
                Err(e) => Self::Undecodable {
                    text,
                    reason: e.to_string(),
                },
            };
        }

        if value.get("error").is_some_and(|e| !e.is_null()) {
            return match serde_json::from_value::<ErrorResponse>(value) {
                Ok(err) => Self::Error(err),
                Err(e) => Self::Undecodable {
                    text,
                    reason: e.to_string(),
                },
            };
        }

        let request_id = extract_request_id(&value);
        Self::Data { request_id, text }
    }

    /// Whether this message ends the in-flight exchange.
    ///
    /// Busy errors and intermediate statuses keep the slot occupied.
    pub fn releases_slot(&self) -> bool {
        match self {
            Self::Data { .. } | Self::Undecodable { .. } => true,
            Self::Status(status) => status.is_terminal(),
            Self::Error(err) => !err.is_busy(),
        }
    }
}

fn extract_request_id(value: &Value) -> Option<Uuid> {
    value
        .get(REQUEST_ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Add `request_id` to a JSON object payload.
pub fn inject_request_id(message: &str, id: Uuid) -> Result<String, TransportError> {
    let mut value: Value = serde_json::from_str(message)
        .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
    let Some(object) = value.as_object_mut() else {
        return Err(TransportError::InvalidPayload(
            "expected a JSON object".to_string(),
        ));
    };
    object.insert(REQUEST_ID_FIELD.to_string(), Value::String(id.to_string()));
    Ok(value.to_string())
}
