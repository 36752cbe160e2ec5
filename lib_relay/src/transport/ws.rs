//! # WebSocket Connection Adapter
//!
//! Turns one upgraded axum `WebSocket` into an `Arc<dyn Connection>` and drives
//! the coordinator's four events for it.
//!
//! Each socket is split in two:
//!
//! - the **reader** (the task that owns the upgrade) turns inbound frames into
//!   `on_message`, stream failures into `on_error`, and its own end into
//!   `on_close`;
//! - the **writer** (a spawned task) drains a bounded outbound queue into the
//!   socket, one frame at a time, each under a write deadline.
//!
//! `WsConnection::send` only pushes into the queue with `try_send`, so the
//! broadcaster never waits on a peer. A full queue is reported as
//! `SendError::QueueFull` and that one message is dropped for that one peer.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::core::{
    Connection, ConnectionId, LifecycleCoordinator, Payload, SendError, SharedText, TransportError,
};
use crate::transport::TransportSettings;

/// The transport side of one WebSocket peer, as seen by the core.
pub struct WsConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<Payload>,
    capacity: usize,
    closing: CancellationToken,
}

impl WsConnection {
    /// Creates the handle plus the receiving end of its outbound queue.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Payload>) {
        // mpsc::channel panics on zero capacity.
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Self {
            id: ConnectionId::next(),
            outbound: tx,
            capacity,
            closing: CancellationToken::new(),
        });
        (conn, rx)
    }

    /// Resolves once `close` was called (by the core or by the writer).
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }
}

impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, payload: Payload) -> Result<(), SendError> {
        if self.closing.is_cancelled() {
            return Err(SendError::Closed);
        }
        match self.outbound.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    fn close(&self) {
        self.closing.cancel();
    }
}

// Frames and payloads share the same buffer in both directions; only the
// UTF-8 check runs again.
fn to_frame(payload: Payload) -> Result<Message, std::str::Utf8Error> {
    match payload {
        Payload::Text(text) => Ok(Message::Text(Utf8Bytes::try_from(text.into_bytes())?)),
        Payload::Binary(bytes) => Ok(Message::Binary(bytes)),
    }
}

fn from_text_frame(text: Utf8Bytes) -> Result<Payload, std::str::Utf8Error> {
    SharedText::try_from(Bytes::from(text)).map(Payload::Text)
}

/// Runs one upgraded socket until it closes, errors, or is force-closed.
pub async fn handle_socket(
    socket: WebSocket,
    coordinator: Arc<LifecycleCoordinator>,
    settings: TransportSettings,
) {
    let (conn, outbound) = WsConnection::new(settings.outbound_queue);
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        Arc::clone(&conn),
        Arc::clone(&coordinator),
        settings.send_timeout,
    ));

    coordinator.on_open(conn.clone());
    read_loop(stream, &conn, &coordinator).await;

    // The peer is gone for the relay as soon as its read side ends, even if
    // the writer is still stuck in a send.
    coordinator.on_close(&*conn);
    conn.close();
    if let Err(e) = writer.await {
        log::error!("Writer task for {} ended abnormally: {}", conn.id(), e);
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    conn: &Arc<WsConnection>,
    coordinator: &LifecycleCoordinator,
) {
    let closing = conn.closing();
    loop {
        tokio::select! {
            _ = closing.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => match from_text_frame(text) {
                    Ok(payload) => {
                        coordinator.on_message(&**conn, payload);
                    }
                    Err(e) => log::warn!("Dropping text frame from {}: {}", conn.id(), e),
                },
                Some(Ok(Message::Binary(bytes))) => {
                    coordinator.on_message(&**conn, Payload::Binary(bytes));
                }
                Some(Ok(Message::Close(_))) => break,
                // Ping/pong are answered by the protocol layer and never relayed.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    coordinator.on_error(&**conn, &TransportError::Receive(e.to_string()));
                    break;
                }
                None => break,
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    conn: Arc<WsConnection>,
    coordinator: Arc<LifecycleCoordinator>,
    send_timeout: Duration,
) {
    let closing = conn.closing();
    loop {
        let payload = tokio::select! {
            _ = closing.cancelled() => break,
            next = outbound.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
        };

        let frame = match to_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Skipping malformed frame for {}: {}", conn.id(), e);
                continue;
            }
        };

        match tokio::time::timeout(send_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                coordinator.on_error(&*conn, &TransportError::Send(e.to_string()));
                break;
            }
            Err(_) => {
                let ms = u64::try_from(send_timeout.as_millis()).unwrap_or(u64::MAX);
                coordinator.on_error(&*conn, &TransportError::SendTimeout(ms));
                break;
            }
        }
    }

    // Best effort close handshake; the peer may already be gone.
    if tokio::time::timeout(send_timeout, sink.close()).await.is_err() {
        log::debug!("Close handshake with {} timed out", conn.id());
    }
}
