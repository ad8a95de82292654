//! tether-services: the stateful pieces of the transport.
//!
//! Each component here is usable and testable on its own; the façade in
//! tether-client wires them to a connection and an event loop.

pub mod backpressure;
pub mod connection;
pub mod correlation;
pub mod reassembly;

pub use backpressure::{BackpressureQueue, Outbound, QueueSnapshot};
pub use connection::{Connection, ConnectionEvent, MemoryConnection, MemoryPeer};
pub use correlation::{CorrelationTable, ResponseHandle};
pub use reassembly::ReassemblyBuffer;
