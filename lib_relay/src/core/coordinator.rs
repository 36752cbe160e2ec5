//! # Lifecycle Coordinator
//!
//! The glue between a transport and the core. A transport calls exactly four
//! handlers per connection:
//!
//! | event      | effect                                   | state          |
//! |------------|------------------------------------------|----------------|
//! | `on_open`  | `registry.add(conn)`                     | → `Open`       |
//! | `on_message` | `broadcaster.broadcast(conn, payload)` | unchanged      |
//! | `on_close` | `registry.remove(conn)`                  | `Open → Closed` |
//! | `on_error` | `conn.close()` then `registry.remove(conn)` | `Open → Closed` |
//!
//! A connection that errors is terminated, never recovered. Whether or not the
//! transport also fires `on_close` after an error, the connection ends up
//! removed exactly once (removal is idempotent). None of the handlers block.

use std::sync::Arc;

use crate::core::connection::{Connection, ConnectionId, Payload};
use crate::core::dispatcher::{BroadcastReport, Broadcaster};
use crate::core::error::TransportError;
use crate::core::registry::ConnectionRegistry;

/// Per-connection lifecycle state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

pub struct LifecycleCoordinator {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(ConnectionRegistry::new()))
    }
}

impl LifecycleCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Transport accepted a new connection.
    pub fn on_open(&self, conn: Arc<dyn Connection>) {
        let id = conn.id();
        if self.registry.add(conn) {
            log::info!(
                "Connection {} opened ({} connected)",
                id,
                self.registry.len()
            );
        }
    }

    /// Transport received one message on `conn`.
    pub fn on_message(&self, conn: &dyn Connection, payload: Payload) -> BroadcastReport {
        let sender = conn.id();
        // A late frame from a connection already torn down is not relayed.
        if !self.registry.contains(&sender) {
            log::debug!("Dropping message from unregistered connection {}", sender);
            return BroadcastReport::default();
        }
        self.broadcaster.broadcast(&sender, &payload)
    }

    /// Transport reports that `conn` closed.
    pub fn on_close(&self, conn: &dyn Connection) {
        let id = conn.id();
        if self.registry.remove(&id).is_some() {
            log::info!(
                "Connection {} closed ({} connected)",
                id,
                self.registry.len()
            );
        }
    }

    /// Transport reports a stream or protocol failure on `conn`.
    pub fn on_error(&self, conn: &dyn Connection, error: &TransportError) {
        let id = conn.id();
        log::warn!("Connection {} failed: {}. Closing it.", id, error);
        conn.close();
        if self.registry.remove(&id).is_some() {
            log::info!(
                "Connection {} removed after error ({} connected)",
                id,
                self.registry.len()
            );
        }
    }

    pub fn state(&self, id: &ConnectionId) -> ConnectionState {
        if self.registry.contains(id) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Unregisters and force-closes every connection. Used on shutdown.
    ///
    /// # Returns
    /// How many connections were closed.
    pub fn close_all(&self) -> usize {
        let drained = self.registry.drain();
        for conn in &drained {
            conn.close();
        }
        if !drained.is_empty() {
            log::info!("Closed {} connection(s) for shutdown", drained.len());
        }
        drained.len()
    }
}
