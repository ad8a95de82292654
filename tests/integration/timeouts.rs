use serde_json::json;
use tokio::time::Instant;

use tether_client::TransportError;

use crate::*;

/// No response within 50 ms: the await rejects with `Timeout` at 50 ms and
/// a response at 100 ms changes nothing.
#[tokio::test(start_paused = true)]
async fn test_request_times_out_and_late_reply_is_ignored() -> Result<()> {
    let mut h = harness();
    let mut inbound = h.transport.subscribe();
    let started = Instant::now();

    let pending = {
        let transport = h.transport.clone();
        tokio::spawn(async move {
            transport
                .send_and_await(&json!({"q": "slow"}).to_string(), Duration::from_millis(50))
                .await
        })
    };
    let request = h.next_json().await?;

    assert_eq!(pending.await?, Err(TransportError::Timeout));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(50) && waited < Duration::from_millis(60));
    assert_eq!(h.transport.pending_requests(), 0);

    tokio::time::sleep_until(started + Duration::from_millis(100)).await;
    h.reply_to(&request, json!({"a": "late"}));

    // the late reply has no waiter, so subscribers see it instead
    let late: Value = serde_json::from_str(&inbound.recv().await?)?;
    assert_eq!(late["a"], "late");
    Ok(())
}

/// A peer that never answers: the timeout rejects the waiter and frees the
/// slot, so the next queued message goes out at the deadline.
#[tokio::test(start_paused = true)]
async fn test_timeout_frees_slot_for_next_message() -> Result<()> {
    let mut h = harness();
    let started = Instant::now();
    let handle = h.transport.request(&json!({"q": 1}).to_string(), Duration::from_millis(50))?;
    h.transport.send(json!({"after": true}).to_string())?;
    let request = h.next_json().await?;
    h.assert_quiet().await;

    assert_eq!(handle.await, Err(TransportError::Timeout));
    assert_eq!(h.next_json().await?["after"], true);
    assert!(started.elapsed() < Duration::from_millis(60));

    // a reply for the abandoned request is only a stray message now
    let mut inbound = h.transport.subscribe();
    h.reply_to(&request, json!({"a": "late"}));
    let late: Value = serde_json::from_str(&inbound.recv().await?)?;
    assert_eq!(late["a"], "late");
    Ok(())
}

/// A request that times out while still queued is never sent.
#[tokio::test(start_paused = true)]
async fn test_request_timed_out_in_queue_is_never_sent() -> Result<()> {
    let mut h = harness();
    h.transport.send(json!({"first": true}).to_string())?;
    let queued = h.transport.request(&json!({"q": "stale"}).to_string(), Duration::from_millis(20))?;
    h.transport.send(json!({"last": true}).to_string())?;
    let first = h.next_json().await?;
    assert_eq!(first["first"], true);

    assert_eq!(queued.await, Err(TransportError::Timeout));
    h.assert_quiet().await;

    h.peer.send(json!({"ok": true}).to_string());
    assert_eq!(h.next_json().await?["last"], true);
    Ok(())
}

/// Each request gets its own deadline.
#[tokio::test(start_paused = true)]
async fn test_independent_deadlines() -> Result<()> {
    let mut h = harness();
    let short = h.transport.request(&json!({"n": 1}).to_string(), Duration::from_millis(20))?;
    let long = h.transport.request(&json!({"n": 2}).to_string(), LONG)?;

    let first = h.next_json().await?;
    assert_eq!(short.await, Err(TransportError::Timeout));
    h.reply_to(&first, json!({"a": 1}));

    let second = h.next_json().await?;
    h.reply_to(&second, json!({"a": 2}));
    let response: Value = serde_json::from_str(&long.await?)?;
    assert_eq!(response["a"], 2);
    Ok(())
}
