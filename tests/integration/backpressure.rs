use serde_json::json;

use crate::*;

/// Two 5 KB messages back to back: the first goes out at once, the second
/// only after the first is answered.
#[tokio::test(start_paused = true)]
async fn test_second_message_waits_for_first_completion() -> Result<()> {
    let mut h = harness();
    let m1 = payload_of_size("m1", 5 * 1024);
    let m2 = payload_of_size("m2", 5 * 1024);
    let mut state = h.transport.queue_state();

    h.transport.send(m1.clone())?;
    h.transport.send(m2.clone())?;

    assert_eq!(h.peer.recv().await.as_deref(), Some(m1.as_str()));
    state.wait_for(|s| s.in_flight && s.queued == 1).await?;
    h.assert_quiet().await;

    h.peer.send(json!({"ok": true}).to_string());
    assert_eq!(h.peer.recv().await.as_deref(), Some(m2.as_str()));
    Ok(())
}

/// A queue of correlated requests drains strictly in submission order and
/// each handle gets its own response.
#[tokio::test(start_paused = true)]
async fn test_requests_drain_in_fifo_order() -> Result<()> {
    let mut h = harness();
    let handles: Vec<_> = (0..4)
        .map(|n| h.transport.request(&json!({ "n": n }).to_string(), LONG))
        .collect::<Result<_, _>>()?;

    for n in 0..4 {
        let frame = h.next_json().await?;
        assert_eq!(frame["n"], n);
        h.reply_to(&frame, json!({ "echo": n }));
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let response: Value = serde_json::from_str(&handle.await?)?;
        assert_eq!(response["echo"], n);
    }
    assert_eq!(h.transport.pending_requests(), 0);
    Ok(())
}

/// Intermediate statuses keep the slot; `complete` frees it.
#[tokio::test(start_paused = true)]
async fn test_processing_status_gates_the_queue() -> Result<()> {
    let mut h = harness();
    h.transport.send(json!({"job": 1}).to_string())?;
    h.transport.send(json!({"job": 2}).to_string())?;
    h.next_json().await?;

    h.peer.send(json!({"type": "processing_status", "status": "processing", "details": "50%"}).to_string());
    h.assert_quiet().await;

    h.peer.send(json!({"type": "processing_status", "status": "complete"}).to_string());
    assert_eq!(h.next_json().await?["job"], 2);
    Ok(())
}

/// Unparseable peer text frees the slot instead of wedging the queue, and
/// is not broadcast.
#[tokio::test(start_paused = true)]
async fn test_undecodable_reply_releases_slot() -> Result<()> {
    let mut h = harness();
    let mut inbound = h.transport.subscribe();
    h.transport.send(json!({"n": 1}).to_string())?;
    h.transport.send(json!({"n": 2}).to_string())?;
    h.next_json().await?;

    h.peer.send("<html>502 Bad Gateway</html>");
    assert_eq!(h.next_json().await?["n"], 2);
    assert!(inbound.try_recv().is_err());
    Ok(())
}
