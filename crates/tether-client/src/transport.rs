//! `Transport`: the handle callers use to talk to the peer.
//!
//! ```text
//!  send / request ──► commands ──► EventLoop ──► Connection::send
//!                                     ▲
//!  ConnectionEvent (Opened/Frame/Closed) ┘
//!
//!  responses ──► CorrelationTable ──► ResponseHandle   (correlated)
//!            └─► subscribe()                           (everything else)
//! ```
//!
//! Handles are cheap to clone and share one event loop. The loop stops on
//! `close()` or when the last handle is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use tether_core::config::{ConfigError, TransportSettings};
use tether_core::wire::inject_request_id;
use tether_core::{ErrorResponse, ProcessingStatus, TransportError};
use tether_services::{
    Connection, ConnectionEvent, CorrelationTable, Outbound, QueueSnapshot, ResponseHandle,
};

use crate::event_loop::{Command, EventLoop, Outlets};

const INBOUND_CAPACITY: usize = 256;
const ERROR_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Transport {
    commands: mpsc::UnboundedSender<Command>,
    correlation: CorrelationTable,
    inbound: broadcast::Sender<String>,
    errors: broadcast::Sender<ErrorResponse>,
    status: watch::Receiver<Option<ProcessingStatus>>,
    queue_state: watch::Receiver<QueueSnapshot>,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl Transport {
    /// Start the event loop over `connection` and return the first handle.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<C: Connection>(
        connection: C,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        settings: TransportSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (errors, _) = broadcast::channel(ERROR_CAPACITY);
        let (status_tx, status) = watch::channel(None);
        let (queue_tx, queue_state) = watch::channel(QueueSnapshot::default());
        let (abandoned_tx, abandoned_rx) = mpsc::unbounded_channel();
        let correlation = CorrelationTable::with_abandon_notices(abandoned_tx);
        let closed = Arc::new(AtomicBool::new(false));
        let request_timeout = settings.request_timeout();

        let outlets = Outlets {
            inbound: inbound.clone(),
            errors: errors.clone(),
            status: status_tx,
            queue_state: queue_tx,
        };
        let event_loop = EventLoop::new(
            connection,
            events,
            command_rx,
            abandoned_rx,
            correlation.clone(),
            settings,
            outlets,
            closed.clone(),
        );
        tokio::spawn(event_loop.run());

        Ok(Self {
            commands,
            correlation,
            inbound,
            errors,
            status,
            queue_state,
            closed,
            request_timeout,
        })
    }

    /// Fire-and-forget. The message is queued behind whatever is in flight.
    pub fn send(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.submit(Outbound::new(message.into(), None))
    }

    /// Send a JSON object tagged with a fresh `request_id` and return a
    /// handle that settles with the matching response.
    pub fn request(&self, message: &str, timeout: Duration) -> Result<ResponseHandle, TransportError> {
        if self.is_closed() {
            return Err(TransportError::TransportClosed);
        }
        let id = Uuid::new_v4();
        let tagged = inject_request_id(message, id)?;
        let handle = self.correlation.register(id, timeout);
        if let Err(e) = self.submit(Outbound::new(tagged, Some(id))) {
            self.correlation.reject(id, e.clone());
            return Err(e);
        }
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(request_id = %id, timeout_ms, "request submitted");
        Ok(handle)
    }

    /// `request` and wait for the response.
    pub async fn send_and_await(&self, message: &str, timeout: Duration) -> Result<String, TransportError> {
        self.request(message, timeout)?.await
    }

    /// `send_and_await` with the configured default timeout.
    pub async fn send_and_await_default(&self, message: &str) -> Result<String, TransportError> {
        self.send_and_await(message, self.request_timeout).await
    }

    /// Reject the waiter for `id`. A request still queued is never sent;
    /// one already in flight gives up its slot to the next message.
    pub fn cancel(&self, id: Uuid) -> bool {
        self.correlation.cancel(id)
    }

    /// Write a frame now, bypassing the queue and the in-flight slot.
    pub async fn send_immediate(&self, message: impl Into<String>) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendImmediate {
            text: message.into(),
            reply,
        })?;
        rx.await.unwrap_or(Err(TransportError::TransportClosed))
    }

    /// Re-send the in-flight message, e.g. after the peer answered busy.
    pub fn retry_in_flight(&self) -> Result<(), TransportError> {
        self.command(Command::RetryInFlight)
    }

    /// Drop every queued message and free the in-flight slot. Waiters for
    /// dropped requests are cancelled.
    pub fn clear_queue(&self) -> Result<(), TransportError> {
        self.command(Command::ClearQueue)
    }

    /// Shut down: reject pending requests, discard queued messages, close
    /// the connection. Later calls return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Close { done }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Inbound messages not claimed by a pending request.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }

    /// Error responses from the peer, including busy signals.
    pub fn errors(&self) -> broadcast::Receiver<ErrorResponse> {
        self.errors.subscribe()
    }

    /// Latest `processing_status` from the peer.
    pub fn status(&self) -> watch::Receiver<Option<ProcessingStatus>> {
        self.status.clone()
    }

    pub fn queue_state(&self) -> watch::Receiver<QueueSnapshot> {
        self.queue_state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlation.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn submit(&self, message: Outbound) -> Result<(), TransportError> {
        self.command(Command::Submit(message))
    }

    fn command(&self, cmd: Command) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::TransportClosed);
        }
        self.commands
            .send(cmd)
            .map_err(|_| TransportError::TransportClosed)
    }
}
