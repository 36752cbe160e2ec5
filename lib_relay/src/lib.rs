//! # lib_relay
//!
//! Building blocks of the relay server: a registry of open connections, a
//! fan-out broadcaster, the lifecycle coordinator that glues transport events
//! to both, the axum WebSocket transport and the auxiliary worker supervisor.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
#[cfg(feature = "transport")]
pub mod transport;
#[cfg(feature = "worker")]
pub mod worker;

// Re-export the types most callers need.
pub use crate::core::{
    BroadcastReport, Broadcaster, Connection, ConnectionId, ConnectionRegistry, ConnectionState,
    LifecycleCoordinator, Payload, SendError, SharedText, TransportError,
};
#[cfg(feature = "transport")]
pub use transport::{router, serve, TransportSettings};
#[cfg(feature = "worker")]
pub use worker::{launch_or_report, WorkerError, WorkerProcess, WorkerSpec};
