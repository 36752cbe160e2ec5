use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::connection::{Connection, ConnectionId, Payload};
use crate::core::error::SendError;

/// In-memory connection that records what it was sent.
pub(crate) struct MockConnection {
    id: ConnectionId,
    received: Mutex<Vec<Payload>>,
    attempts: AtomicUsize,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl MockConnection {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            received: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        })
    }

    /// A connection whose every `send` fails with `SendError::Closed`.
    pub(crate) fn failing() -> Arc<Self> {
        let conn = Self::new();
        conn.failing.store(true, Ordering::SeqCst);
        conn
    }

    pub(crate) fn received(&self) -> Vec<Payload> {
        self.received.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, payload: Payload) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        self.received.lock().unwrap().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) fn as_dyn(conn: &Arc<MockConnection>) -> Arc<dyn Connection> {
    conn.clone()
}
