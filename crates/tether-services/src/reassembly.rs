//! Reassembly buffer: collects chunk frames per `msg_id` until the set
//! is complete, then hands back the original message.
//!
//! Per id: absent → collecting → complete (emitted, removed)
//!                             ↘ abandoned (malformed or idle too long, removed)
//!
//! Slots are stored sparsely: memory tracks the frames actually received,
//! never the `total_chunks` a peer announces.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use tether_core::{ChunkError, ChunkFrame};

struct Entry {
    total: u32,
    slots: BTreeMap<u32, String>,
    last_activity: Instant,
}

impl Entry {
    fn received(&self) -> usize {
        self.slots.len()
    }
}

pub struct ReassemblyBuffer {
    entries: HashMap<Uuid, Entry>,
    /// Entries with no new frame for this long are evicted.
    idle_timeout: Duration,
}

impl ReassemblyBuffer {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            idle_timeout,
        }
    }

    /// Store one frame. Returns the full message once its last frame lands.
    ///
    /// On error the whole set for `frame.msg_id` is dropped.
    pub fn accept(&mut self, frame: ChunkFrame, now: Instant) -> Result<Option<String>, ChunkError> {
        let msg_id = frame.msg_id;
        match self.store(frame, now) {
            Ok(true) => Ok(self.take_complete(&msg_id)),
            Ok(false) => Ok(None),
            Err(e) => {
                self.entries.remove(&msg_id);
                Err(e)
            }
        }
    }

    /// Returns whether the set is now complete.
    fn store(&mut self, frame: ChunkFrame, now: Instant) -> Result<bool, ChunkError> {
        let msg_id = frame.msg_id;
        if frame.total_chunks == 0 {
            return Err(ChunkError::ZeroTotal { msg_id });
        }

        let entry = self.entries.entry(msg_id).or_insert_with(|| Entry {
            total: frame.total_chunks,
            slots: BTreeMap::new(),
            last_activity: now,
        });

        if frame.total_chunks != entry.total {
            return Err(ChunkError::TotalMismatch {
                msg_id,
                expected: entry.total,
                got: frame.total_chunks,
            });
        }

        let index = frame.chunk_index;
        if index >= entry.total {
            return Err(ChunkError::IndexOutOfRange {
                msg_id,
                index,
                total: entry.total,
            });
        }

        match entry.slots.get(&index) {
            // chunks are never retransmitted with new content
            Some(existing) if *existing != frame.data => {
                return Err(ChunkError::ConflictingDuplicate { msg_id, index });
            }
            Some(_) => tracing::debug!(%msg_id, index, "duplicate chunk ignored"),
            None => {
                entry.slots.insert(index, frame.data);
            }
        }
        entry.last_activity = now;

        tracing::debug!(
            %msg_id,
            index,
            received = entry.received(),
            total = entry.total,
            "chunk stored"
        );
        Ok(entry.received() == entry.total as usize)
    }

    fn take_complete(&mut self, msg_id: &Uuid) -> Option<String> {
        let entry = self.entries.remove(msg_id)?;
        let message: String = entry.slots.into_values().collect();
        tracing::debug!(%msg_id, chunks = entry.total, bytes = message.len(), "chunk set reassembled");
        Some(message)
    }

    /// Drop sets that have been idle past the timeout. Returns their ids.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<Uuid> {
        let mut evicted = Vec::new();
        let idle_timeout = self.idle_timeout;
        self.entries.retain(|msg_id, entry| {
            let stale = now.saturating_duration_since(entry.last_activity) > idle_timeout;
            if stale {
                tracing::warn!(
                    %msg_id,
                    received = entry.received(),
                    total = entry.total,
                    "evicting incomplete chunk set"
                );
                evicted.push(*msg_id);
            }
            !stale
        });
        evicted
    }

    /// Number of sets currently collecting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
