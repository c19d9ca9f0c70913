//! Live mapping of client identifiers to connections.
//!
//! Owned by one [`Server`](crate::Server). The accept path inserts, each
//! read loop removes its own entry on termination, and closing the server
//! clears whatever is left. Every operation takes the lock for the duration
//! of a map operation only; nothing here awaits while holding it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::ClientId;

use crate::connection::Connection;

/// Thread-safe registry of open connections
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Arc<Connection>>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its own identifier.
    ///
    /// Returns the previous entry if the identifier was already present.
    pub fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.clients.lock().insert(connection.id(), connection)
    }

    /// Look up a connection
    pub fn get(&self, id: &ClientId) -> Option<Arc<Connection>> {
        self.clients.lock().get(id).cloned()
    }

    /// Remove a connection, returning it if it was present
    pub fn remove(&self, id: &ClientId) -> Option<Arc<Connection>> {
        self.clients.lock().remove(id)
    }

    /// Whether the identifier is registered
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.lock().contains_key(id)
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether no connections are registered
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Identifiers of all registered connections, in no particular order
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.lock().keys().copied().collect()
    }

    /// Point-in-time copy of all registered connections.
    ///
    /// Connections registered or removed after the call are not reflected.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.clients.lock().values().cloned().collect()
    }

    /// Remove every entry, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut clients = self.clients.lock();
        let count = clients.len();
        clients.clear();
        count
    }
}
