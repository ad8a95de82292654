//! Chunk codec: split oversized messages into ordered chunk frames and
//! rebuild them. Pure functions, no I/O.
//!
//! Sizes are measured in bytes of the UTF-8 text. A split never cuts a
//! character in half, so a frame may carry slightly less than `chunk_size`
//! bytes when a multi-byte character straddles the boundary.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::ChunkError;
use crate::wire::ChunkFrame;

/// Reference frame size: 30 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 30 * 1024;

/// Split `message` into frames of at most `chunk_size` bytes each.
///
/// Every byte of `message` lands in exactly one frame, in order. An empty
/// message yields a single empty frame, so it reassembles like any other.
/// A `chunk_size` of 0 is treated as 1.
pub fn split(message: &str, chunk_size: usize, msg_id: Uuid) -> Vec<ChunkFrame> {
    let pieces = pieces(message, chunk_size.max(1));
    let total_chunks = u32::try_from(pieces.len()).unwrap_or(u32::MAX);
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, data)| ChunkFrame {
            msg_id,
            chunk_index: i as u32,
            total_chunks,
            data: data.to_string(),
        })
        .collect()
}

fn pieces(message: &str, chunk_size: usize) -> Vec<&str> {
    if message.is_empty() {
        return vec![message];
    }
    let mut out = Vec::with_capacity(message.len().div_ceil(chunk_size));
    let mut rest = message;
    while !rest.is_empty() {
        let mut end = chunk_size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // chunk_size is smaller than this character; emit it whole
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        out.push(head);
        rest = tail;
    }
    out
}

/// Encode a message into the text frames that go on the wire.
///
/// Messages at or below `chunk_size` bytes go out unframed, as-is.
/// Larger ones are split under a fresh `msg_id`.
pub fn encode_outbound(message: &str, chunk_size: usize) -> Vec<String> {
    if message.len() <= chunk_size {
        return vec![message.to_string()];
    }
    split(message, chunk_size, Uuid::new_v4())
        .iter()
        .map(ChunkFrame::to_json)
        .collect()
}

/// Rebuild a message from the complete frame set of one `msg_id`.
///
/// Payloads are concatenated by ascending `chunk_index` regardless of the
/// order they appear in `frames`.
pub fn assemble(frames: &[ChunkFrame]) -> Result<String, ChunkError> {
    let first = frames.first().ok_or(ChunkError::Empty)?;
    let msg_id = first.msg_id;
    let total = first.total_chunks;
    if total == 0 {
        return Err(ChunkError::ZeroTotal { msg_id });
    }

    // sparse: `total` comes off the wire and may be absurdly large
    let mut slots: BTreeMap<u32, &str> = BTreeMap::new();
    for frame in frames {
        if frame.total_chunks != total {
            return Err(ChunkError::TotalMismatch {
                msg_id,
                expected: total,
                got: frame.total_chunks,
            });
        }
        let index = frame.chunk_index;
        if index >= total {
            return Err(ChunkError::IndexOutOfRange { msg_id, index, total });
        }
        match slots.get(&index) {
            Some(existing) if *existing != frame.data => {
                return Err(ChunkError::ConflictingDuplicate { msg_id, index });
            }
            Some(_) => {}
            None => {
                slots.insert(index, frame.data.as_str());
            }
        }
    }

    // keys are ascending, so the first key that skips ahead marks the gap
    let mut message = String::new();
    let mut expected = 0u32;
    for (&index, data) in &slots {
        if index != expected {
            return Err(ChunkError::Incomplete { msg_id, index: expected });
        }
        message.push_str(data);
        expected += 1;
    }
    if expected != total {
        return Err(ChunkError::Incomplete { msg_id, index: expected });
    }
    Ok(message)
}
