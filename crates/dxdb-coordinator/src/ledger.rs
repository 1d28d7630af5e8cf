//! Connections enlisted in the active distributed transaction

use dxdb_common::ConnectionId;
use dxdb_network::RemoteConnection;
use std::sync::Arc;

/// Ordered set of connections that have run at least one statement in the
/// current transaction. Failed connections stay listed for outcome
/// bookkeeping.
#[derive(Debug, Default)]
pub struct RemoteTransactionLedger {
    connections: Vec<Arc<RemoteConnection>>,
}

impl RemoteTransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Returns false if it is already enlisted.
    pub fn enlist(&mut self, connection: Arc<RemoteConnection>) -> bool {
        if self.contains(connection.id()) {
            return false;
        }
        self.connections.push(connection);
        true
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.iter().any(|c| c.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RemoteConnection>> {
        self.connections.iter()
    }

    pub fn failed(&self) -> Vec<Arc<RemoteConnection>> {
        self.connections
            .iter()
            .filter(|c| c.is_failed())
            .cloned()
            .collect()
    }

    /// True when at least one connection is enlisted and none is usable.
    pub fn all_failed(&self) -> bool {
        !self.connections.is_empty() && self.connections.iter().all(|c| c.is_failed())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
