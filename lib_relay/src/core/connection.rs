//! # Connections and Payloads
//!
//! A connection is owned by whichever transport accepted it. The core only
//! ever holds an `Arc<dyn Connection>` for as long as the connection is open,
//! and only ever uses the two capabilities the trait exposes: push a payload
//! outward, or force the connection closed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::core::error::SendError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one connection.
///
/// Equality on the id is the only thing the registry and the broadcaster use
/// to tell connections apart (including "everyone except the sender").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next unused id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// # Connection Capability
///
/// What the core needs from one open bidirectional message stream.
///
/// Both operations must return promptly: `send` hands the payload to the
/// transport (typically a bounded per-connection queue) and reports failure
/// instead of waiting, and `close` only *requests* termination. The transport
/// reports the actual close back through the coordinator.
pub trait Connection: Send + Sync {
    /// Identity used for membership and sender exclusion.
    fn id(&self) -> ConnectionId;

    /// Fire-and-forget delivery of one payload to the peer.
    fn send(&self, payload: Payload) -> Result<(), SendError>;

    /// Force the connection closed. Calling it more than once is harmless.
    fn close(&self);
}

/// UTF-8 text in a shared, reference counted buffer.
///
/// Built only from `&str`, `String` or validated bytes, so the buffer always
/// holds valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharedText(Bytes);

impl SharedText {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SharedText {
    fn from(text: &str) -> Self {
        SharedText(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<String> for SharedText {
    fn from(text: String) -> Self {
        SharedText(Bytes::from(text))
    }
}

impl TryFrom<Bytes> for SharedText {
    type Error = std::str::Utf8Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        std::str::from_utf8(&bytes)?;
        Ok(SharedText(bytes))
    }
}

impl fmt::Display for SharedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Relay Payload
///
/// An opaque, immutable message. Text stays text and binary stays binary on
/// the way through; nothing else about the content is interpreted.
///
/// Both variants share one buffer, so handing the same payload to a thousand
/// peers clones a pointer a thousand times, not the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(SharedText),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The text body, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text.as_str()),
            Payload::Binary(_) => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(SharedText::from(text))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(SharedText::from(text))
    }
}

impl From<SharedText> for Payload {
    fn from(text: SharedText) -> Self {
        Payload::Text(text)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}
