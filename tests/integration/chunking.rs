use serde_json::json;
use uuid::Uuid;

use tether_core::{split, ChunkFrame};

use crate::*;

fn chunk_settings(chunk_size: usize) -> TransportSettings {
    TransportSettings {
        chunk_size,
        ..TransportSettings::default()
    }
}

/// 100 KB at a 30 KB chunk size is exactly four frames that concatenate
/// back to the original.
#[tokio::test(start_paused = true)]
async fn test_oversized_message_is_sent_as_four_chunks() -> Result<()> {
    let mut h = harness_with(chunk_settings(30 * 1024));
    let message = payload_of_size("big", 100 * 1024);
    h.transport.send(message.clone())?;

    let mut frames = Vec::new();
    for _ in 0..4 {
        frames.push(h.next_json().await?);
    }
    h.assert_quiet().await;

    let msg_id = frames[0]["msg_id"].clone();
    let mut rebuilt = String::new();
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame["type"], "chunk");
        assert_eq!(frame["msg_id"], msg_id);
        assert_eq!(frame["chunk_index"], i);
        assert_eq!(frame["total_chunks"], 4);
        rebuilt.push_str(frame["data"].as_str().context("data")?);
    }
    assert_eq!(rebuilt, message);
    Ok(())
}

/// A message at the threshold goes out unframed.
#[tokio::test(start_paused = true)]
async fn test_message_at_threshold_is_unframed() -> Result<()> {
    let mut h = harness_with(chunk_settings(1024));
    let message = payload_of_size("edge", 1024);
    h.transport.send(message.clone())?;
    assert_eq!(h.peer.recv().await.as_deref(), Some(message.as_str()));
    Ok(())
}

/// A chunked response, delivered out of order, resolves the request once
/// the last frame lands.
#[tokio::test(start_paused = true)]
async fn test_chunked_response_is_reassembled() -> Result<()> {
    let mut h = harness();
    let handle = h.transport.request(&json!({"q": "report"}).to_string(), LONG)?;
    let request = h.next_json().await?;

    let body = json!({
        "request_id": request["request_id"],
        "report": "r".repeat(2000),
    })
    .to_string();
    let mut frames: Vec<ChunkFrame> = split(&body, 300, Uuid::new_v4());
    frames.reverse();
    for frame in &frames {
        h.peer.send(frame.to_json());
    }

    assert_eq!(handle.await?, body);
    Ok(())
}

/// A corrupted set is dropped; a clean set for another id still completes.
#[tokio::test(start_paused = true)]
async fn test_malformed_chunk_set_is_dropped() -> Result<()> {
    let h = harness();
    let mut inbound = h.transport.subscribe();

    let bad = split(&json!({"which": "bad"}).to_string(), 5, Uuid::new_v4());
    let mut lying = bad[1].clone();
    lying.total_chunks += 1;
    h.peer.send(bad[0].to_json());
    h.peer.send(lying.to_json());
    for frame in &bad[1..] {
        h.peer.send(frame.to_json());
    }

    let good_body = json!({"which": "good"}).to_string();
    for frame in split(&good_body, 5, Uuid::new_v4()) {
        h.peer.send(frame.to_json());
    }

    assert_eq!(inbound.recv().await?, good_body);
    Ok(())
}

/// A set that stops arriving is evicted; a late frame starts a fresh set
/// that never completes on its own.
#[tokio::test(start_paused = true)]
async fn test_stalled_chunk_set_is_evicted() -> Result<()> {
    let settings = TransportSettings {
        reassembly_timeout_ms: 100,
        sweep_interval_ms: 10,
        ..TransportSettings::default()
    };
    let h = harness_with(settings);
    let mut inbound = h.transport.subscribe();
    let body = json!({"slow": true}).to_string();
    let frames = split(&body, 4, Uuid::new_v4());

    h.peer.send(frames[0].to_json());
    tokio::time::sleep(Duration::from_millis(200)).await;
    for frame in &frames[1..] {
        h.peer.send(frame.to_json());
    }

    let outcome = tokio::time::timeout(Duration::from_secs(1), inbound.recv()).await;
    assert!(outcome.is_err(), "evicted set must not complete");
    Ok(())
}
