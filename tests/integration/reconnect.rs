use serde_json::json;

use tether_client::TransportError;

use crate::*;

/// Connection loss with three requests pending rejects all three; after
/// reconnecting, the cancelled requests stay unsent and the fire-and-forget
/// messages that never left the queue go out in order.
#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_and_reconnect_resumes() -> Result<()> {
    let mut h = harness();
    let handles: Vec<_> = (0..3)
        .map(|n| h.transport.request(&json!({ "req": n }).to_string(), LONG))
        .collect::<Result<_, _>>()?;
    h.transport.send(json!({"fire": "a"}).to_string())?;
    h.transport.send(json!({"fire": "b"}).to_string())?;

    assert_eq!(h.next_json().await?["req"], 0);

    let mut state = h.transport.queue_state();
    h.peer.disconnect();
    for handle in handles {
        assert!(matches!(handle.await, Err(TransportError::Cancelled { .. })));
    }
    state.wait_for(|s| !s.open && !s.in_flight).await?;
    assert_eq!(h.transport.pending_requests(), 0);

    // submissions while down are queued, not failed
    h.transport.send(json!({"fire": "c"}).to_string())?;
    h.assert_quiet().await;

    h.peer.reconnect();
    let order = [
        json!({"fire": "a"}),
        json!({"fire": "b"}),
        json!({"fire": "c"}),
    ];
    for expected in order {
        let frame = h.next_json().await?;
        let key = expected.as_object().and_then(|o| o.keys().next()).context("key")?;
        assert_eq!(frame[key], expected[key]);
        assert!(frame.get("req").is_none(), "cancelled request was sent: {frame}");
        h.peer.send(json!({"ok": true}).to_string());
    }
    h.assert_quiet().await;
    Ok(())
}

/// `close()` rejects waiters and fails every later call fast.
#[tokio::test(start_paused = true)]
async fn test_close_is_terminal() -> Result<()> {
    let mut h = harness();
    let in_flight = h.transport.request(&json!({"n": 1}).to_string(), LONG)?;
    let queued = h.transport.request(&json!({"n": 2}).to_string(), LONG)?;
    h.next_json().await?;

    h.transport.close().await;
    assert!(matches!(in_flight.await, Err(TransportError::Cancelled { .. })));
    assert!(matches!(queued.await, Err(TransportError::Cancelled { .. })));
    assert_eq!(h.transport.send("{}"), Err(TransportError::TransportClosed));
    assert_eq!(
        h.transport.send_and_await("{}", LONG).await,
        Err(TransportError::TransportClosed)
    );
    assert!(!h.peer.is_open());
    h.assert_quiet().await;
    Ok(())
}
