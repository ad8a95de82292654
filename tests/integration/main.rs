//! tether integration test harness.
//!
//! Every test drives a real `Transport` against a scripted peer. Most use
//! the in-memory connection with paused time; `tcp` runs over loopback.
//!
//!   cargo test --test integration

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use tether_client::{MemoryConnection, MemoryPeer, Transport, TransportSettings};

mod backpressure;
mod chunking;
mod reconnect;
mod tcp;
mod timeouts;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const LONG: Duration = Duration::from_secs(30);

pub struct Harness {
    pub transport: Transport,
    pub peer: MemoryPeer,
}

pub fn harness() -> Harness {
    harness_with(TransportSettings::default())
}

pub fn harness_with(settings: TransportSettings) -> Harness {
    let (conn, events, peer) = MemoryConnection::pair();
    let transport = Transport::spawn(conn, events, settings).expect("valid settings");
    Harness { transport, peer }
}

impl Harness {
    /// Next frame the client wrote, parsed.
    pub async fn next_json(&mut self) -> Result<Value> {
        let frame = self.peer.recv().await.context("client side dropped")?;
        serde_json::from_str(&frame).with_context(|| format!("frame is not JSON: {frame}"))
    }

    /// Assert nothing further was written, after letting the loop run.
    pub async fn assert_quiet(&mut self) {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(self.peer.try_recv(), None, "unexpected frame on the wire");
    }

    /// Answer the request carried by `frame`, echoing its id.
    pub fn reply_to(&self, frame: &Value, body: Value) {
        let mut body = body;
        body["request_id"] = frame["request_id"].clone();
        self.peer.send(body.to_string());
    }
}

/// JSON object whose serialized form is exactly `size` bytes.
pub fn payload_of_size(tag: &str, size: usize) -> String {
    let prefix = format!(r#"{{"tag":"{tag}","fill":""#);
    let suffix = r#""}"#;
    let fill = size - prefix.len() - suffix.len();
    format!("{prefix}{}{suffix}", "x".repeat(fill))
}

#[test]
fn payload_helper_hits_requested_size() {
    let p = payload_of_size("m1", 5 * 1024);
    assert_eq!(p.len(), 5 * 1024);
    assert!(serde_json::from_str::<Value>(&p).is_ok());
}
