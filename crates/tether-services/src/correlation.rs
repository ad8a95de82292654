//! Correlation table: matches responses to the requests waiting on them.
//!
//! ```text
//! register(id, timeout)  ──► entry + timer task ──► ResponseHandle
//!
//! resolve(id, payload) ─┐
//! timer fires          ─┼─► remove(id) ──► whoever removes the entry settles it
//! cancel(id)           ─┤
//! cancel_all(reason)   ─┘
//! ```
//!
//! Removal from the map is the single point of truth: a response racing a
//! timeout or a connection-loss cancellation settles the handle exactly
//! once, whichever removes the entry first. Everything else is a no-op.
//!
//! A table built with `with_abandon_notices` also reports every id that
//! was settled by its timer or by `cancel`, so the owner of the outbound
//! queue can stop waiting on a reply nobody wants.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use uuid::Uuid;

use tether_core::TransportError;

type Outcome = Result<String, TransportError>;

struct Pending {
    tx: oneshot::Sender<Outcome>,
    timer: Option<AbortHandle>,
}

/// Pending requests keyed by correlation id. Cheap to clone; clones share
/// the same table.
#[derive(Clone, Default)]
pub struct CorrelationTable {
    pending: Arc<DashMap<Uuid, Pending>>,
    abandoned: Option<mpsc::UnboundedSender<Uuid>>,
}

/// Settles with the response text, or with the reason there will be none.
pub struct ResponseHandle {
    id: Uuid,
    rx: oneshot::Receiver<Outcome>,
}

impl ResponseHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for ResponseHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(TransportError::cancelled("correlation table dropped")))
        })
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that sends each timed-out or caller-cancelled id on `notices`.
    pub fn with_abandon_notices(notices: mpsc::UnboundedSender<Uuid>) -> Self {
        Self {
            pending: Arc::default(),
            abandoned: Some(notices),
        }
    }

    /// Start waiting for `id`. The returned handle times out after `timeout`.
    ///
    /// Must be called inside a tokio runtime (the timer is a task).
    pub fn register(&self, id: Uuid, timeout: Duration) -> ResponseHandle {
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.pending.insert(id, Pending { tx, timer: None }) {
            tracing::warn!(request_id = %id, "correlation id re-registered, cancelling previous waiter");
            Self::settle(previous, Err(TransportError::cancelled("superseded")));
        }

        let table = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if table.reject(id, TransportError::Timeout) {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(request_id = %id, timeout_ms, "request timed out");
                table.notify_abandoned(id);
            }
        });
        match self.pending.get_mut(&id) {
            Some(mut entry) => entry.timer = Some(timer.abort_handle()),
            // settled before the timer was attached
            None => timer.abort(),
        }

        ResponseHandle { id, rx }
    }

    /// Fulfil `id` with `payload`. Unknown or already-settled ids are
    /// ignored; returns whether a waiter was found.
    pub fn resolve(&self, id: Uuid, payload: String) -> bool {
        self.try_resolve(id, payload).is_ok()
    }

    /// Like `resolve`, but hands the payload back when nobody is waiting.
    pub fn try_resolve(&self, id: Uuid, payload: String) -> Result<(), String> {
        match self.pending.remove(&id) {
            Some((_, pending)) => {
                Self::settle(pending, Ok(payload));
                Ok(())
            }
            None => {
                tracing::debug!(request_id = %id, "response for unknown or settled request ignored");
                Err(payload)
            }
        }
    }

    /// Reject `id` with `error`. No-op for unknown ids.
    pub fn reject(&self, id: Uuid, error: TransportError) -> bool {
        match self.pending.remove(&id) {
            Some((_, pending)) => {
                Self::settle(pending, Err(error));
                true
            }
            None => false,
        }
    }

    /// Caller-initiated cancellation. Safe on unknown ids.
    pub fn cancel(&self, id: Uuid) -> bool {
        let cancelled = self.reject(id, TransportError::cancelled("cancelled by caller"));
        if cancelled {
            self.notify_abandoned(id);
        }
        cancelled
    }

    /// Reject every pending request with `Cancelled { reason }`.
    /// Returns how many were rejected.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<Uuid> = self.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.reject(*id, TransportError::cancelled(reason)))
            .count()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn notify_abandoned(&self, id: Uuid) {
        if let Some(notices) = &self.abandoned {
            // receiver gone means nobody owns a queue any more
            let _ = notices.send(id);
        }
    }

    fn settle(pending: Pending, outcome: Outcome) {
        if let Some(timer) = pending.timer {
            timer.abort();
        }
        // the caller may have dropped the handle; nothing to deliver then
        let _ = pending.tx.send(outcome);
    }
}
