//! Registry of live WebSocket connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::connection::ClientConnection;

/// Connected clients indexed by connection ID.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &str) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write().await;
        conns.remove(connection_id)
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// All connections at this instant. The lock is released on return.
    pub async fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Connections authenticated as `user_id`.
    pub async fn user_connections(&self, user_id: &str) -> Vec<Arc<ClientConnection>> {
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|c| c.identity().is_some_and(|i| i.user_id == user_id))
            .cloned()
            .collect()
    }

    /// Close every connection.
    pub async fn close_all(&self) {
        for conn in self.connections.read().await.values() {
            conn.close();
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
