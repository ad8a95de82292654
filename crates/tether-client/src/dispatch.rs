//! Routes inbound frames: chunk frames go through reassembly, complete
//! messages are classified once and then delivered to a waiter, a
//! broadcast subscriber, or the status/error outlets.

use tokio::time::Instant;
use uuid::Uuid;

use tether_core::wire::{decode_inbound, Inbound};
use tether_core::{PeerMessage, TransportError};
use tether_services::Connection;

use crate::event_loop::EventLoop;

impl<C: Connection> EventLoop<C> {
    pub(crate) fn dispatch_frame(&mut self, text: String) {
        let message = match decode_inbound(text) {
            Ok(Inbound::Message(message)) => message,
            Ok(Inbound::Chunk(frame)) => match self.reassembly.accept(frame, Instant::now()) {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed chunk set");
                    return;
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable chunk frame");
                return;
            }
        };
        self.dispatch_message(PeerMessage::classify(message));
    }

    pub(crate) fn dispatch_message(&mut self, message: PeerMessage) {
        let releases = message.releases_slot() && self.answers_in_flight(&message);

        match message {
            PeerMessage::Data { request_id, text } => {
                let unclaimed = match request_id {
                    Some(id) => self.correlation.try_resolve(id, text).err(),
                    None => Some(text),
                };
                if let Some(text) = unclaimed {
                    // no subscribers is fine
                    let _ = self.outlets.inbound.send(text);
                }
            }
            PeerMessage::Status(status) => {
                tracing::debug!(status = ?status.status, details = ?status.details, "processing status");
                self.outlets.status.send_replace(Some(status));
            }
            PeerMessage::Error(err) if err.is_busy() => {
                tracing::info!(error = %err.error, "peer busy");
                let _ = self.outlets.errors.send(err);
                self.on_peer_busy();
            }
            PeerMessage::Error(err) => {
                tracing::warn!(error = %err.error, details = ?err.details, "peer error");
                if let Some(id) = err.request_id {
                    self.correlation.reject(
                        id,
                        TransportError::Peer {
                            error: err.error.clone(),
                            details: err.details.clone(),
                        },
                    );
                }
                let _ = self.outlets.errors.send(err);
            }
            PeerMessage::Undecodable { reason, text } => {
                tracing::warn!(%reason, bytes = text.len(), "undecodable inbound message");
            }
        }

        if releases {
            self.complete_in_flight();
        }
    }

    /// A reply tagged with some other request's id does not end the
    /// current exchange. Untagged replies always do.
    fn answers_in_flight(&self, message: &PeerMessage) -> bool {
        let tagged: Option<Uuid> = match message {
            PeerMessage::Data { request_id, .. } => *request_id,
            PeerMessage::Error(err) => err.request_id,
            PeerMessage::Status(_) | PeerMessage::Undecodable { .. } => None,
        };
        let awaited = self.queue.in_flight().and_then(|m| m.request_id);
        match (tagged, awaited) {
            (Some(got), Some(want)) => got == want,
            _ => true,
        }
    }
}
