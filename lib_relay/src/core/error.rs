use thiserror::Error;

/// Why a single delivery to one peer did not happen.
///
/// These never escape a broadcast: the broadcaster logs them and moves on to
/// the next peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The peer's outbound side is gone (socket closed or writer task ended).
    #[error("connection is closed")]
    Closed,

    /// The peer is not draining its outbound queue fast enough.
    #[error("outbound queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },
}

/// A stream or protocol failure reported by the transport for one connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Reading a frame from the peer failed (malformed stream, protocol violation, reset).
    #[error("receive failed: {0}")]
    Receive(String),

    /// Writing a frame to the peer failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Writing a frame to the peer did not finish within the deadline.
    #[error("send timed out after {0} ms")]
    SendTimeout(u64),
}
