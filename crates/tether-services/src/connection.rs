//! Connection capability: the seam between the transport and whatever
//! carries text frames (TCP lines, a WebSocket, an in-process pipe).
//!
//! The transport never establishes or re-establishes connections. It is
//! handed something that can send frames and a stream of
//! `ConnectionEvent`s, and it reacts to those events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use tether_core::TransportError;

/// What the connection reports to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is (again) able to carry frames.
    Opened,
    /// One raw inbound text frame.
    Frame(String),
    /// The connection dropped. More events may follow after a reconnect.
    Closed,
}

/// Outbound half of a connection.
///
/// `send` must not block: implementations hand the frame to a writer task
/// or buffer. Frames are delivered in the order `send` is called.
pub trait Connection: Send + Sync + 'static {
    fn send(&self, frame: String) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Tear the connection down. Idempotent.
    fn close(&self);
}

// ── In-process connection ─────────────────────────────────────────────────────

/// A connection whose far end is a `MemoryPeer` in the same process.
pub struct MemoryConnection {
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

/// The far end of a `MemoryConnection`: sees what the client sent and
/// scripts what it receives.
pub struct MemoryPeer {
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    open: Arc<AtomicBool>,
}

impl MemoryConnection {
    /// Create an open connection, its event stream, and the peer end.
    pub fn pair() -> (
        MemoryConnection,
        mpsc::UnboundedReceiver<ConnectionEvent>,
        MemoryPeer,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let conn = MemoryConnection {
            outbound: out_tx,
            open: open.clone(),
        };
        let peer = MemoryPeer {
            outbound: out_rx,
            events: ev_tx,
            open,
        };
        (conn, ev_rx, peer)
    }
}

impl Connection for MemoryConnection {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Connection("connection is not open".into()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Connection("peer dropped".into()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl MemoryPeer {
    /// Next frame the client sent, waiting if none yet.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next frame the client sent, if one is already buffered.
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Deliver a frame to the client.
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.events.send(ConnectionEvent::Frame(frame.into()));
    }

    /// Drop the link without tearing down the pair.
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::Release);
        let _ = self.events.send(ConnectionEvent::Closed);
    }

    pub fn reconnect(&self) {
        self.open.store(true, Ordering::Release);
        let _ = self.events.send(ConnectionEvent::Opened);
    }

    /// Whether the client side has closed or the link is down.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
