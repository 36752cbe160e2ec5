//! # Relay Core
//!
//! The part of the relay with concurrency, lifecycle and failure-handling
//! concerns. Nothing in here knows about sockets: connections are reached only
//! through the [`Connection`] capability trait.
//!
//! ## Core Components:
//!
//! - **`connection`**: connection identity, the `Connection` trait and the
//!   opaque `Payload` that flows through the relay.
//! - **`registry`**: the live set of open connections, safe under concurrent
//!   mutation and iteration.
//! - **`dispatcher`**: the broadcaster. Delivers one payload to every
//!   registered connection except its sender, isolating per-peer failures.
//! - **`coordinator`**: maps the four transport events (open, message, close,
//!   error) onto registry and broadcaster operations.

/// Connection identity, capability trait and payload type.
pub mod connection;
/// The live set of open connections.
pub mod registry;
/// Best-effort fan-out of one payload to all other peers.
pub mod dispatcher;
/// Transport event handlers and the error-to-termination policy.
pub mod coordinator;
/// Error types shared by the core and its transports.
pub mod error;

#[cfg(test)]
pub(crate) mod testing;

// --- Public API Re-exports ---
pub use connection::{Connection, ConnectionId, Payload, SharedText};
pub use coordinator::{ConnectionState, LifecycleCoordinator};
pub use dispatcher::{BroadcastReport, Broadcaster};
pub use error::{SendError, TransportError};
pub use registry::ConnectionRegistry;
