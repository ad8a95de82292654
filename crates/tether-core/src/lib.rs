//! tether-core: wire format, chunk codec, configuration, and error types.
//! All other tether crates depend on this one.

pub mod codec;
pub mod config;
pub mod error;
pub mod wire;

pub use codec::{assemble, encode_outbound, split, DEFAULT_CHUNK_SIZE};
pub use error::{ChunkError, TransportError};
pub use wire::{ChunkFrame, ErrorResponse, PeerMessage, ProcessingStatus, StatusKind};
