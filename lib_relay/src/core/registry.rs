//! # Connection Registry
//!
//! The live set of open connections. Every transport event handler touches it
//! (open/close mutate, message iterates), potentially from many tasks at once,
//! so all access goes through one mutex.
//!
//! Iteration is copy-on-iterate: `for_each_except` clones the `Arc` handles
//! under the lock, releases it, and only then calls back into user code. A
//! slow `send` therefore never holds up an open or close on another
//! connection, and a close racing the iteration can never invalidate it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::connection::{Connection, ConnectionId};

type Members = HashMap<ConnectionId, Arc<dyn Connection>>;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Members>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the map half-updated (every
    // critical section is a single map call), so a poisoned lock is still usable.
    fn members(&self) -> MutexGuard<'_, Members> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Add
    ///
    /// Registers `conn`. Adding an id that is already present is a no-op and
    /// keeps the original handle.
    ///
    /// # Returns
    /// `true` if the connection was newly inserted.
    pub fn add(&self, conn: Arc<dyn Connection>) -> bool {
        let id = conn.id();
        let mut members = self.members();
        if members.contains_key(&id) {
            log::debug!("Connection {} already registered", id);
            return false;
        }
        members.insert(id, conn);
        true
    }

    /// # Remove
    ///
    /// Unregisters the connection with `id`. Removing an absent id is a no-op.
    ///
    /// # Returns
    /// The handle that was registered, if any.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        self.members().remove(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    /// Ids of all currently registered connections, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.members().keys().copied().collect()
    }

    /// Removes and returns every registered connection.
    pub fn drain(&self) -> Vec<Arc<dyn Connection>> {
        self.members().drain().map(|(_, conn)| conn).collect()
    }

    /// # For Each Except
    ///
    /// Calls `f` once for every registered connection other than `excluded`,
    /// in unspecified order.
    ///
    /// The set of candidates is the membership at the moment of the call.
    /// A candidate that is removed before its turn comes is skipped, so `f`
    /// only sees connections that were registered both at the start and right
    /// before their own visit. No connection is visited twice.
    ///
    /// # Returns
    /// The number of connections `f` was called for.
    pub fn for_each_except<F>(&self, excluded: &ConnectionId, mut f: F) -> usize
    where
        F: FnMut(&Arc<dyn Connection>),
    {
        let snapshot: Vec<Arc<dyn Connection>> = self
            .members()
            .iter()
            .filter(|(id, _)| *id != excluded)
            .map(|(_, conn)| Arc::clone(conn))
            .collect();

        let mut visited = 0;
        for conn in &snapshot {
            if !self.contains(&conn.id()) {
                log::trace!("Skipping {}: removed during broadcast", conn.id());
                continue;
            }
            f(conn);
            visited += 1;
        }
        visited
    }
}
