//! TCP line connection: one JSON frame per `\n`-terminated line.
//!
//! Pretty-printed JSON is flattened before it is written; a multi-line
//! frame that is not JSON is refused without touching the socket.
//!
//! A writer task drains an unbounded channel so `send` never blocks. A
//! reader task turns lines into `ConnectionEvent::Frame` and reports
//! `Closed` on EOF or a read error. There is no reconnect; callers that
//! want one build a new connection and transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};

use tether_core::TransportError;
use tether_services::{Connection, ConnectionEvent};

pub struct TcpLineConnection {
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
}

impl TcpLineConnection {
    /// Connect and start the reader and writer tasks.
    pub async fn connect(
        addr: impl ToSocketAddrs,
    ) -> std::io::Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        tracing::info!(%peer_addr, "connected");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_loop(write_half, out_rx, shutdown.subscribe(), open.clone()));
        tokio::spawn(read_loop(read_half, ev_tx, shutdown.subscribe(), open.clone()));

        let conn = Self {
            outbound: out_tx,
            open,
            shutdown,
        };
        (conn, ev_rx)
    }
}

impl Connection for TcpLineConnection {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Connection("connection is not open".into()));
        }
        let frame = single_line(frame)?;
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Connection("writer task stopped".into()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.shutdown.send(());
        }
    }
}

/// Raw line breaks are only ever whitespace between JSON tokens.
fn single_line(frame: String) -> Result<String, TransportError> {
    if !frame.contains('\n') {
        return Ok(frame);
    }
    serde_json::from_str::<serde_json::Value>(&frame).map_err(|e| {
        TransportError::Connection(format!("multi-line frame is not JSON and cannot be line-delimited: {e}"))
    })?;
    Ok(frame.replace(['\r', '\n'], ""))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<String>,
    mut shutdown: broadcast::Receiver<()>,
    open: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            frame = frames.recv() => {
                let Some(mut frame) = frame else { break };
                frame.push('\n');
                if let Err(e) = writer.write_all(frame.as_bytes()).await {
                    tracing::warn!(error = %e, "tcp write failed");
                    open.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
    tracing::debug!("tcp writer stopped");
}

async fn read_loop(
    reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut shutdown: broadcast::Receiver<()>,
    open: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if events.send(ConnectionEvent::Frame(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("peer closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tcp read failed");
                    break;
                }
            },
        }
    }
    open.store(false, Ordering::Release);
    let _ = events.send(ConnectionEvent::Closed);
}
