//! Transport event loop: the single task that owns the backpressure queue
//! and the reassembly buffer.
//!
//! Caller commands, connection events, abandoned-request notices, the
//! busy-retry deadline and the reassembly sweep all funnel through one
//! `select!`, so queue transitions
//! never interleave. The correlation table is shared with the `Transport`
//! handles; everything else lives here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use tether_core::config::TransportSettings;
use tether_core::{encode_outbound, ErrorResponse, ProcessingStatus, TransportError};
use tether_services::{
    BackpressureQueue, Connection, ConnectionEvent, CorrelationTable, Outbound, QueueSnapshot,
    ReassemblyBuffer,
};

/// Requests from `Transport` handles.
pub(crate) enum Command {
    Submit(Outbound),
    SendImmediate {
        text: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    RetryInFlight,
    ClearQueue,
    Close { done: oneshot::Sender<()> },
}

/// Where the event loop publishes what it observes.
pub(crate) struct Outlets {
    pub inbound: broadcast::Sender<String>,
    pub errors: broadcast::Sender<ErrorResponse>,
    pub status: watch::Sender<Option<ProcessingStatus>>,
    pub queue_state: watch::Sender<QueueSnapshot>,
}

pub(crate) struct EventLoop<C: Connection> {
    pub(crate) connection: C,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Requests the correlation table gave up on (timeout or caller cancel).
    abandoned: mpsc::UnboundedReceiver<Uuid>,
    pub(crate) queue: BackpressureQueue,
    pub(crate) reassembly: ReassemblyBuffer,
    pub(crate) correlation: CorrelationTable,
    pub(crate) settings: TransportSettings,
    pub(crate) outlets: Outlets,
    closed: Arc<AtomicBool>,
    /// When the busy in-flight message is due to be re-sent.
    pub(crate) retry_at: Option<Instant>,
}

impl<C: Connection> EventLoop<C> {
    pub(crate) fn new(
        connection: C,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        commands: mpsc::UnboundedReceiver<Command>,
        abandoned: mpsc::UnboundedReceiver<Uuid>,
        correlation: CorrelationTable,
        settings: TransportSettings,
        outlets: Outlets,
        closed: Arc<AtomicBool>,
    ) -> Self {
        let queue = BackpressureQueue::new(connection.is_open());
        let reassembly = ReassemblyBuffer::new(settings.reassembly_timeout());
        Self {
            connection,
            events,
            commands,
            abandoned,
            queue,
            reassembly,
            correlation,
            settings,
            outlets,
            closed,
            retry_at: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.settings.sweep_interval());
        let mut events_open = true;
        self.publish_queue_state();
        tracing::info!(
            open = self.queue.is_open(),
            chunk_size = self.settings.chunk_size,
            "transport started"
        );

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        tracing::debug!("all transport handles dropped, event loop exiting");
                        self.shutdown("transport dropped");
                        return;
                    };
                    if let Some(done) = self.handle_command(cmd) {
                        let _ = done.send(());
                        return;
                    }
                }

                event = self.events.recv(), if events_open => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            tracing::warn!("connection event stream ended");
                            events_open = false;
                            self.handle_event(ConnectionEvent::Closed);
                        }
                    }
                }

                Some(id) = self.abandoned.recv() => self.on_request_abandoned(id),

                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_in_flight();
                }

                _ = sweep.tick() => {
                    self.reassembly.evict_stale(Instant::now());
                }
            }
            self.publish_queue_state();
        }
    }

    /// Returns the close acknowledgement when the loop must stop.
    fn handle_command(&mut self, cmd: Command) -> Option<oneshot::Sender<()>> {
        match cmd {
            Command::Submit(message) => self.submit(message),
            Command::SendImmediate { text, reply } => {
                let result = if self.queue.is_closed() {
                    Err(TransportError::TransportClosed)
                } else {
                    self.connection.send(text)
                };
                let _ = reply.send(result);
            }
            Command::RetryInFlight => self.retry_in_flight(),
            Command::ClearQueue => self.clear_queue(),
            Command::Close { done } => {
                self.shutdown("transport closed");
                return Some(done);
            }
        }
        None
    }

    fn submit(&mut self, message: Outbound) {
        let request_id = message.request_id;
        match self.queue.submit(message) {
            Ok(true) => self.transmit_in_flight(),
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(error = %e, "submit rejected");
                if let Some(id) = request_id {
                    self.correlation.reject(id, e);
                }
            }
        }
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Frame(text) => self.dispatch_frame(text),
            ConnectionEvent::Opened => {
                tracing::info!(queued = self.queue.queued(), "connection opened");
                if self.queue.on_connection_opened() {
                    self.transmit_in_flight();
                }
            }
            ConnectionEvent::Closed => {
                let cancelled = self.correlation.cancel_all("connection lost");
                let released = self.queue.on_connection_closed();
                self.retry_at = None;
                self.reassembly.clear();
                tracing::warn!(
                    cancelled,
                    released_in_flight = released.is_some(),
                    queued = self.queue.queued(),
                    "connection closed"
                );
            }
        }
    }

    /// Send whatever occupies the in-flight slot, chunking if oversized.
    pub(crate) fn transmit_in_flight(&mut self) {
        self.skip_abandoned_in_flight();
        let Some(message) = self.queue.in_flight() else {
            return;
        };
        let request_id = message.request_id;
        let frames = encode_outbound(&message.text, self.settings.chunk_size);
        if frames.len() > 1 {
            tracing::info!(frames = frames.len(), bytes = message.text.len(), "sending chunked message");
        } else {
            tracing::debug!(bytes = message.text.len(), "sending message");
        }

        for frame in frames {
            if let Err(e) = self.connection.send(frame) {
                if let Some(id) = request_id {
                    self.correlation.reject(id, e.clone());
                }
                if self.connection.is_open() {
                    // the link is fine, only this message was refused
                    tracing::warn!(error = %e, "message rejected by connection, skipping it");
                    self.complete_in_flight();
                } else {
                    tracing::warn!(error = %e, "send failed, pausing queue until the connection reopens");
                    self.queue.on_connection_closed();
                    self.retry_at = None;
                }
                return;
            }
        }
    }

    /// Drop admitted requests whose waiter was already settled, so a
    /// cancelled or timed-out request never reaches the peer.
    fn skip_abandoned_in_flight(&mut self) {
        while let Some(id) = self.queue.in_flight().and_then(|m| m.request_id) {
            if self.correlation.contains(&id) {
                break;
            }
            tracing::debug!(request_id = %id, "request settled before it was sent, dropping it");
            self.retry_at = None;
            self.queue.on_completion();
        }
    }

    /// The table gave up on `id`. If it holds the in-flight slot, free it.
    fn on_request_abandoned(&mut self, id: Uuid) {
        if self.queue.in_flight().and_then(|m| m.request_id) != Some(id) {
            return;
        }
        tracing::info!(request_id = %id, "in-flight request abandoned, releasing slot");
        self.complete_in_flight();
    }

    /// The in-flight exchange is over; move on to the next message.
    pub(crate) fn complete_in_flight(&mut self) {
        self.retry_at = None;
        if self.queue.on_completion() {
            self.transmit_in_flight();
        }
    }

    /// The peer answered busy for the in-flight message.
    pub(crate) fn on_peer_busy(&mut self) {
        let Some(attempts) = self.queue.on_peer_busy() else {
            tracing::debug!("busy signal with nothing in flight");
            return;
        };
        let policy = self.settings.busy_retry;
        if policy.max_attempts == 0 {
            tracing::info!(attempts, "peer busy, holding slot until retried or completed");
            return;
        }
        if attempts > policy.max_attempts {
            tracing::warn!(attempts, "peer still busy, giving up on in-flight message");
            if let Some(id) = self.queue.in_flight().and_then(|m| m.request_id) {
                self.correlation.reject(id, TransportError::PeerBusy);
            }
            self.complete_in_flight();
            return;
        }
        tracing::debug!(attempts, delay_ms = policy.delay_ms, "peer busy, retry scheduled");
        self.retry_at = Some(Instant::now() + policy.delay());
    }

    fn retry_in_flight(&mut self) {
        self.retry_at = None;
        match self.queue.in_flight() {
            Some(message) => {
                tracing::info!(attempt = message.busy_attempts, "re-sending in-flight message");
                self.transmit_in_flight();
            }
            None => tracing::debug!("retry requested with nothing in flight"),
        }
    }

    fn clear_queue(&mut self) {
        let dropped = self.queue.clear();
        self.retry_at = None;
        for message in &dropped {
            if let Some(id) = message.request_id {
                self.correlation.reject(id, TransportError::cancelled("queue cleared"));
            }
        }
        tracing::info!(dropped = dropped.len(), "outbound queue cleared");
    }

    fn shutdown(&mut self, reason: &str) {
        self.closed.store(true, Ordering::Release);
        let cancelled = self.correlation.cancel_all(reason);
        let discarded = self.queue.close();
        for message in &discarded {
            tracing::warn!(bytes = message.text.len(), "discarding unsent message");
        }
        self.retry_at = None;
        self.reassembly.clear();
        self.connection.close();

        // commands that raced the close
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Submit(message) => {
                    if let Some(id) = message.request_id {
                        self.correlation.reject(id, TransportError::TransportClosed);
                    }
                }
                Command::SendImmediate { reply, .. } => {
                    let _ = reply.send(Err(TransportError::TransportClosed));
                }
                Command::Close { done } => {
                    let _ = done.send(());
                }
                Command::RetryInFlight | Command::ClearQueue => {}
            }
        }

        self.publish_queue_state();
        tracing::info!(cancelled, discarded = discarded.len(), reason, "transport shut down");
    }

    fn publish_queue_state(&self) {
        let snapshot = self.queue.snapshot();
        self.outlets.queue_state.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}
