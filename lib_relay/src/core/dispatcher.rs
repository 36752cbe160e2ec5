//! # Fan-out Broadcaster
//!
//! Takes one payload from one connection and pushes it to every other
//! registered connection.
//!
//! ## Delivery policy
//!
//! Delivery is best-effort and per peer. A peer whose `send` fails (it went
//! away, or its outbound queue is full) is logged and skipped; the remaining
//! peers are still served and the sender never hears about it. There is no
//! retry. Removing the failed peer is left to the transport, which reports
//! its close through the coordinator.
//!
//! The payload is reference counted, so the per-peer cost is one pointer clone
//! plus whatever the peer's `send` does (a non-blocking queue push for the
//! WebSocket transport).

use std::sync::Arc;

use crate::core::connection::{ConnectionId, Payload};
use crate::core::registry::ConnectionRegistry;

/// Outcome counters for one broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers a delivery was attempted for.
    pub attempted: usize,
    /// Peers whose `send` accepted the payload.
    pub delivered: usize,
    /// Peers whose `send` failed.
    pub failed: usize,
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// # Broadcast
    ///
    /// Delivers `payload` to every registered connection except `sender`.
    ///
    /// Never fails as a whole. Individual delivery failures are logged at
    /// `warn` and counted in [`BroadcastReport::failed`].
    pub fn broadcast(&self, sender: &ConnectionId, payload: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let attempted = self.registry.for_each_except(sender, |conn| {
            match conn.send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!(
                        "Delivery from {} to {} failed: {}. Continuing with remaining peers.",
                        sender,
                        conn.id(),
                        e
                    );
                }
            }
        });
        report.attempted = attempted;

        log::trace!(
            "Broadcast from {} ({} bytes): {} attempted, {} delivered, {} failed",
            sender,
            payload.len(),
            report.attempted,
            report.delivered,
            report.failed
        );
        report
    }
}
