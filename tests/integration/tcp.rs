use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use tether_client::{TcpLineConnection, TransportError};

use crate::*;

/// Line-oriented echo peer: answers each line with its `request_id` and
/// a byte count.
async fn echo_peer(listener: TcpListener) -> Result<()> {
    let (stream, _) = listener.accept().await?;
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let v: Value = serde_json::from_str(&line)?;
        let reply = json!({"request_id": v["request_id"], "bytes": line.len()});
        write.write_all(format!("{reply}\n").as_bytes()).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_request_round_trip_over_tcp() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let peer = tokio::spawn(echo_peer(listener));

    let (conn, events) = TcpLineConnection::connect(addr).await?;
    let transport = Transport::spawn(conn, events, TransportSettings::default())?;

    let response = transport
        .send_and_await(&json!({"hello": "tcp"}).to_string(), Duration::from_secs(5))
        .await?;
    let v: Value = serde_json::from_str(&response)?;
    assert!(v["bytes"].as_u64().context("bytes")? > 0);

    transport.close().await;
    peer.await??;
    Ok(())
}

#[tokio::test]
async fn test_peer_hangup_cancels_pending_request() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut lines = BufReader::new(stream).lines();
        // read one request, then hang up without answering
        lines.next_line().await?;
        anyhow::Ok(())
    });

    let (conn, events) = TcpLineConnection::connect(addr).await?;
    let transport = Transport::spawn(conn, events, TransportSettings::default())?;
    let result = transport
        .send_and_await(&json!({"q": 1}).to_string(), Duration::from_secs(5))
        .await;
    peer.await??;

    assert!(matches!(result, Err(TransportError::Cancelled { .. })));
    Ok(())
}

/// A frame the line connection refuses is skipped while the socket stays
/// up; pretty-printed JSON is flattened and everything behind it drains.
#[tokio::test]
async fn test_refused_frame_does_not_stall_the_queue() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (connected, accepted) = tokio::join!(TcpLineConnection::connect(addr), listener.accept());
    let (conn, events) = connected?;
    let (read, mut write) = accepted?.0.into_split();
    let mut lines = BufReader::new(read).lines();
    let transport = Transport::spawn(conn, events, TransportSettings::default())?;

    transport.send("not json\nat all")?;
    transport.send("{\n  \"pretty\": true\n}")?;
    transport.send(json!({"b": 2}).to_string())?;

    let pretty = lines.next_line().await?.context("peer saw nothing")?;
    assert_eq!(serde_json::from_str::<Value>(&pretty)?["pretty"], true);
    write.write_all(b"{\"ok\":true}\n").await?;

    let next = lines.next_line().await?.context("queue stalled")?;
    assert_eq!(serde_json::from_str::<Value>(&next)?["b"], 2);
    assert!(transport.queue_state().borrow().open);

    transport.close().await;
    Ok(())
}
