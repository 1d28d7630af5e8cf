//! Remote connection handle with per-transaction status

use crate::session::{RemoteResult, RemoteSession};
use dxdb_common::{ConnectionId, NodeAddr, Result};
use parking_lot::Mutex;

/// Status of the remote side of the current distributed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Failed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
struct ConnectionState {
    status: TransactionStatus,
    last_error: Option<String>,
}

/// A handle to one remote session.
///
/// Owned by the [`ConnectionPool`](crate::ConnectionPool); transactions and
/// scans hold `Arc` references.
pub struct RemoteConnection {
    id: ConnectionId,
    node: NodeAddr,
    state: Mutex<ConnectionState>,
    session: tokio::sync::Mutex<Box<dyn RemoteSession>>,
}

impl RemoteConnection {
    pub fn new(id: ConnectionId, node: NodeAddr, session: Box<dyn RemoteSession>) -> Self {
        Self {
            id,
            node,
            state: Mutex::new(ConnectionState {
                status: TransactionStatus::Active,
                last_error: None,
            }),
            session: tokio::sync::Mutex::new(session),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn node(&self) -> &NodeAddr {
        &self.node
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    pub fn is_failed(&self) -> bool {
        self.status() == TransactionStatus::Failed
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Transition to `Failed`. Returns false if the connection had already failed,
    /// in which case the original reason is kept.
    pub fn mark_failed(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        if state.status == TransactionStatus::Failed {
            return false;
        }
        state.status = TransactionStatus::Failed;
        state.last_error = Some(reason.into());
        true
    }

    /// Clear the transaction status once the enclosing transaction has ended.
    pub fn reset_status(&self) {
        let mut state = self.state.lock();
        state.status = TransactionStatus::Active;
        state.last_error = None;
    }

    /// Hand `command` to the transport without waiting for the response.
    pub async fn submit(&self, command: &str) -> bool {
        let sent = self.session.lock().await.send_command(command);
        tracing::debug!("{} -> {}: {} (sent={})", self.id, self.node, command, sent);
        sent
    }

    /// Wait until the response to the last submitted command is available.
    pub async fn wait_ready(&self) {
        self.session.lock().await.wait_readable().await;
    }

    pub async fn retrieve_result(&self) -> Result<RemoteResult> {
        self.session.lock().await.take_result()
    }

    pub async fn forget_results(&self) {
        self.session.lock().await.forget_results();
    }
}

impl std::fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("status", &self.status())
            .finish()
    }
}
