//! tether-client: the transport façade.
//!
//! `Transport` is what applications hold. It owns no I/O itself: hand it a
//! `Connection` (TCP lines via `TcpLineConnection`, or the in-memory pair
//! for tests) and it takes care of queueing, chunking, reassembly and
//! response correlation.

mod dispatch;
mod event_loop;
pub mod tcp;
pub mod transport;

pub use tcp::TcpLineConnection;
pub use transport::Transport;

pub use tether_core::config::{BusyRetry, TetherConfig, TransportSettings};
pub use tether_core::{ErrorResponse, ProcessingStatus, StatusKind, TransportError};
pub use tether_services::{
    Connection, ConnectionEvent, MemoryConnection, MemoryPeer, QueueSnapshot, ResponseHandle,
};
