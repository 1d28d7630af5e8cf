//! Coordinator session - the host-facing entry point

use crate::transaction::{EnlistOutcome, TransactionContext, TransactionOutcome};
use crate::variable_set::{BroadcastOptions, BroadcastReport};
use dxdb_common::{CoordinatorConfig, DxdbError, NodeAddr, Result, TransactionId};
use dxdb_network::{ConnectionPool, Connector, RemoteConnection};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One client session on the coordinator: its pooled remote connections,
/// the active distributed transaction (if any) and its interrupt handle.
pub struct CoordinatorSession {
    config: CoordinatorConfig,
    pool: ConnectionPool,
    transaction: Option<TransactionContext>,
    interrupt: CancellationToken,
}

impl CoordinatorSession {
    pub fn new(config: CoordinatorConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            pool: ConnectionPool::new(connector),
            transaction: None,
            interrupt: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Token that cancels whatever this session is currently waiting on
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Install a fresh interrupt token once a cancellation has been handled.
    ///
    /// Handles obtained before the reset no longer reach this session.
    pub fn reset_interrupt(&mut self) {
        if self.interrupt.is_cancelled() {
            self.interrupt = CancellationToken::new();
        }
    }

    /// A cancellation reported to the caller is used up.
    fn settle_interrupt<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(DxdbError::Cancelled)) {
            self.reset_interrupt();
        }
        result
    }

    /// Interrupt token for barrier waits, if the config allows interrupts
    pub fn wait_interrupt(&self) -> Option<CancellationToken> {
        self.config
            .interruptible_waits
            .then(|| self.interrupt.clone())
    }

    pub fn broadcast_options(&self) -> BroadcastOptions {
        BroadcastOptions {
            error_policy: self.config.remote_error_policy,
            interrupt: self.wait_interrupt(),
        }
    }

    pub fn begin(&mut self) -> Result<TransactionId> {
        if let Some(txn) = &self.transaction {
            return Err(DxdbError::Transaction(format!(
                "transaction {} already in progress",
                txn.id()
            )));
        }
        let txn = TransactionContext::new();
        let id = txn.id();
        tracing::info!("Begin distributed transaction {}", id);
        self.transaction = Some(txn);
        Ok(id)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction(&self) -> Option<&TransactionContext> {
        self.transaction.as_ref()
    }

    /// Host transaction manager hook: the transaction must abort.
    pub fn doom_transaction(&mut self, reason: impl Into<String>) {
        if let Some(txn) = self.transaction.as_mut() {
            txn.doom(reason);
        }
    }

    /// Propagate a `SET`-like command to the transaction's remote sessions.
    ///
    /// Outside a transaction there is nothing to keep in sync and `None` is
    /// returned.
    pub async fn process_variable_set(&mut self, command: &str) -> Result<Option<BroadcastReport>> {
        let options = self.broadcast_options();
        let result = match self.transaction.as_mut() {
            Some(txn) => txn.broadcast(command, &options).await.map(Some),
            None => {
                tracing::debug!("No distributed transaction, not broadcasting {:?}", command);
                Ok(None)
            }
        };
        self.settle_interrupt(result)
    }

    /// Connection to `node` for running part of a distributed statement.
    ///
    /// Inside a transaction the connection is enlisted (and brought to session
    /// parity) before it is returned. Failed connections are never handed out.
    pub async fn shard_connection(&mut self, node: &NodeAddr) -> Result<Arc<RemoteConnection>> {
        let result = self.enlist_connection(node).await;
        self.settle_interrupt(result)
    }

    /// [`shard_connection`](Self::shard_connection) for callers that still
    /// have other waits to settle; a cancellation stays pending until they
    /// call [`reset_interrupt`](Self::reset_interrupt).
    pub async fn enlist_connection(&mut self, node: &NodeAddr) -> Result<Arc<RemoteConnection>> {
        let connection = self.pool.get_connection(node).await?;
        let options = self.broadcast_options();

        if let Some(txn) = self.transaction.as_mut() {
            if let EnlistOutcome::Failed { reason } = txn.enlist(connection.clone(), &options).await? {
                return Err(DxdbError::RemoteExecution {
                    connection: connection.id(),
                    message: reason,
                });
            }
        }

        if connection.is_failed() {
            return Err(DxdbError::RemoteExecution {
                connection: connection.id(),
                message: format!(
                    "connection failed earlier in this transaction: {}",
                    connection.last_error().unwrap_or_default()
                ),
            });
        }
        Ok(connection)
    }

    /// Connection to `node` that bypasses transaction bookkeeping.
    pub async fn direct_connection(&self, node: &NodeAddr) -> Result<Arc<RemoteConnection>> {
        let connection = self.pool.get_connection(node).await?;
        if connection.is_failed() {
            return Err(DxdbError::RemoteExecution {
                connection: connection.id(),
                message: format!("connection to {node} has failed"),
            });
        }
        Ok(connection)
    }

    /// End the transaction, clearing ledger and replay log.
    pub fn finish_transaction(&mut self) -> Option<TransactionOutcome> {
        let txn = self.transaction.take()?;
        let outcome = txn.outcome();
        let elapsed_ms = txn.elapsed().num_milliseconds();
        match &outcome {
            TransactionOutcome::Aborted { reason } => tracing::error!(
                "Distributed transaction {} aborted after {}ms: {}",
                txn.id(),
                elapsed_ms,
                reason
            ),
            TransactionOutcome::Degraded { failed } => tracing::warn!(
                "Distributed transaction {} finished in {}ms with {} failed connections",
                txn.id(),
                elapsed_ms,
                failed.len()
            ),
            TransactionOutcome::Committable => {
                tracing::info!("Distributed transaction {} finished in {}ms", txn.id(), elapsed_ms)
            }
        }

        let evicted = self.pool.release_transaction();
        if evicted > 0 {
            tracing::debug!("Evicted {} failed connections from the pool", evicted);
        }
        Some(outcome)
    }
}
