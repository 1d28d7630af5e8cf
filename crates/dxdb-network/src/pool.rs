//! Connection pool for remote sessions

use crate::connection::RemoteConnection;
use crate::session::Connector;
use dashmap::DashMap;
use dxdb_common::{ConnectionId, NodeAddr, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Keeps one session per remote node for the lifetime of a coordinator session
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    connections: DashMap<NodeAddr, Arc<RemoteConnection>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get or open the connection for the given node
    pub async fn get_connection(&self, node: &NodeAddr) -> Result<Arc<RemoteConnection>> {
        let existing = self.connections.get(node).map(|c| c.value().clone());
        if let Some(connection) = existing {
            return Ok(connection);
        }

        let session = self.connector.connect(node).await?;
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(RemoteConnection::new(id, node.clone(), session));
        tracing::debug!("Opened {} to {}", id, node);
        self.connections.insert(node.clone(), connection.clone());
        Ok(connection)
    }

    /// Remove a connection from the pool
    pub fn remove_connection(&self, node: &NodeAddr) -> Option<Arc<RemoteConnection>> {
        self.connections.remove(node).map(|(_, c)| c)
    }

    /// Drop every failed connection so the next transaction reconnects.
    /// Surviving connections get their transaction status cleared.
    pub fn release_transaction(&self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|_, c| !c.is_failed());
        for entry in self.connections.iter() {
            entry.value().reset_status();
        }
        before - self.connections.len()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Clear all connections
    pub fn clear(&self) {
        self.connections.clear();
    }
}
