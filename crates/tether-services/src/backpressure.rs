//! Backpressure queue: at most one message in flight, the rest wait in
//! submission order.
//!
//! States: idle → busy → idle, plus closed (terminal) from either.
//! Connection loss pauses admission without dropping queued messages.
//!
//! This type makes decisions only. The caller transmits whatever
//! `in_flight()` holds after a method reports an admission.

use std::collections::VecDeque;

use uuid::Uuid;

use tether_core::TransportError;

/// A message waiting for, or occupying, the in-flight slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub text: String,
    /// Set when a caller is awaiting a correlated response.
    pub request_id: Option<Uuid>,
    /// Busy answers received for this message so far.
    pub busy_attempts: u32,
}

impl Outbound {
    pub fn new(text: String, request_id: Option<Uuid>) -> Self {
        Self {
            text,
            request_id,
            busy_attempts: 0,
        }
    }
}

/// Point-in-time view for observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub in_flight: bool,
    pub queued: usize,
    pub open: bool,
}

#[derive(Debug)]
pub struct BackpressureQueue {
    queue: VecDeque<Outbound>,
    in_flight: Option<Outbound>,
    /// Connection currently able to carry frames.
    open: bool,
    closed: bool,
}

impl BackpressureQueue {
    pub fn new(open: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            open,
            closed: false,
        }
    }

    /// Admit `message` if idle and connected, otherwise queue it.
    /// Returns whether it was admitted.
    pub fn submit(&mut self, message: Outbound) -> Result<bool, TransportError> {
        if self.closed {
            return Err(TransportError::TransportClosed);
        }
        if self.open && self.in_flight.is_none() {
            self.in_flight = Some(message);
            return Ok(true);
        }
        self.queue.push_back(message);
        tracing::debug!(queued = self.queue.len(), open = self.open, "message queued");
        Ok(false)
    }

    /// The in-flight exchange finished (response, error, or terminal status).
    /// Frees the slot and admits the next queued message, if any.
    pub fn on_completion(&mut self) -> bool {
        self.in_flight = None;
        self.admit_next()
    }

    /// The peer answered busy. The slot stays occupied by the same message.
    /// Returns the updated busy count, or `None` if nothing is in flight.
    pub fn on_peer_busy(&mut self) -> Option<u32> {
        let message = self.in_flight.as_mut()?;
        message.busy_attempts += 1;
        Some(message.busy_attempts)
    }

    /// Connection dropped: stop admitting. Queued messages are kept; the
    /// in-flight one already left and is released.
    pub fn on_connection_closed(&mut self) -> Option<Outbound> {
        self.open = false;
        self.in_flight.take()
    }

    /// Connection is back: resume draining from the front.
    pub fn on_connection_opened(&mut self) -> bool {
        self.open = true;
        self.admit_next()
    }

    /// Enter the terminal state. Returns everything that will never be sent.
    pub fn close(&mut self) -> Vec<Outbound> {
        self.closed = true;
        self.open = false;
        self.in_flight.take().into_iter().chain(self.queue.drain(..)).collect()
    }

    /// Drop queued messages and free the slot, without closing.
    pub fn clear(&mut self) -> Vec<Outbound> {
        self.in_flight.take().into_iter().chain(self.queue.drain(..)).collect()
    }

    fn admit_next(&mut self) -> bool {
        if self.closed || !self.open || self.in_flight.is_some() {
            return false;
        }
        match self.queue.pop_front() {
            Some(next) => {
                self.in_flight = Some(next);
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> Option<&Outbound> {
        self.in_flight.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            in_flight: self.in_flight.is_some(),
            queued: self.queue.len(),
            open: self.open,
        }
    }
}
