//! Per-transaction coordinator state

use crate::ledger::RemoteTransactionLedger;
use crate::replay_log::{normalize_command, SessionReplayLog};
use crate::variable_set::{broadcast_to_ledger, escalate, BroadcastOptions, BroadcastReport};
use chrono::{DateTime, TimeDelta, Utc};
use dxdb_common::{ConnectionId, DxdbError, NodeAddr, RemoteErrorPolicy, Result, TransactionId};
use dxdb_network::{send_and_wait, RemoteConnection, TransactionStatus};
use std::sync::Arc;

/// How a transaction looks from the connection statuses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Every enlisted connection is healthy
    Committable,
    /// Some connections failed; the healthy subset can still finish
    Degraded { failed: Vec<ConnectionId> },
    Aborted { reason: String },
}

/// Result of enlisting a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnlistOutcome {
    /// Newly enlisted after replaying `replayed` commands
    Enlisted { replayed: usize },
    AlreadyEnlisted,
    /// Enlisted but unusable for the rest of the transaction
    Failed { reason: String },
}

/// One line of transaction diagnostics
#[derive(Debug, Clone)]
pub struct ConnectionDiagnostic {
    pub connection: ConnectionId,
    pub node: NodeAddr,
    pub status: TransactionStatus,
    pub last_error: Option<String>,
}

impl std::fmt::Display for ConnectionDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.connection, self.node, self.status)?;
        if let Some(error) = &self.last_error {
            write!(f, " ({error})")?;
        }
        Ok(())
    }
}

/// State of one distributed transaction: the enlisted connections and the
/// session commands they have all seen.
#[derive(Debug)]
pub struct TransactionContext {
    id: TransactionId,
    started_at: DateTime<Utc>,
    ledger: RemoteTransactionLedger,
    replay_log: Option<SessionReplayLog>,
    doomed: Option<String>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            started_at: Utc::now(),
            ledger: RemoteTransactionLedger::new(),
            replay_log: None,
            doomed: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> TimeDelta {
        Utc::now() - self.started_at
    }

    pub fn ledger(&self) -> &RemoteTransactionLedger {
        &self.ledger
    }

    /// `None` until the first session command is broadcast
    pub fn replay_log(&self) -> Option<&SessionReplayLog> {
        self.replay_log.as_ref()
    }

    pub fn replay_commands(&self) -> &[String] {
        self.replay_log
            .as_ref()
            .map(SessionReplayLog::commands)
            .unwrap_or_default()
    }

    pub fn is_doomed(&self) -> bool {
        self.doomed.is_some()
    }

    /// Mark the transaction as bound to abort; later broadcasts do nothing.
    pub fn doom(&mut self, reason: impl Into<String>) {
        if self.doomed.is_none() {
            let reason = reason.into();
            tracing::warn!("Transaction {} doomed: {}", self.id, reason);
            self.doomed = Some(reason);
        }
    }

    /// Deliver a session-altering command to every enlisted, non-failed
    /// connection and record it for connections that join later.
    pub async fn broadcast(&mut self, command: &str, options: &BroadcastOptions) -> Result<BroadcastReport> {
        if command.trim().is_empty() {
            return Err(DxdbError::InvalidArgument(
                "empty session command".to_string(),
            ));
        }
        if self.doomed.is_some() {
            tracing::debug!("Transaction {} doomed, skipping broadcast", self.id);
            return Ok(BroadcastReport::new(normalize_command(command)));
        }

        self.replay_log.get_or_insert_with(SessionReplayLog::new);
        let mut report = match broadcast_to_ledger(&self.ledger, command, options).await {
            Ok(report) => report,
            Err(e) => {
                // The log no longer describes what the accepted connections saw.
                self.doom(format!("session command interrupted: {e}"));
                return Err(e);
            }
        };

        if let Some(e) = escalate(&report, options.error_policy) {
            self.doom(format!("session command failed: {e}"));
            return Err(e);
        }

        report.command = self
            .replay_log
            .get_or_insert_with(SessionReplayLog::new)
            .append(command)
            .to_string();
        if !report.is_clean() {
            tracing::warn!(
                "Session command {:?} failed on {} of {} connections",
                report.command,
                report.failures.len(),
                self.ledger.len()
            );
        }
        if self.ledger.all_failed() {
            tracing::error!("Transaction {}: every remote connection has failed", self.id);
        }
        Ok(report)
    }

    /// Enlist a connection, bringing it to session parity by replaying the log.
    pub async fn enlist(
        &mut self,
        connection: Arc<RemoteConnection>,
        options: &BroadcastOptions,
    ) -> Result<EnlistOutcome> {
        if !self.ledger.enlist(connection.clone()) {
            return Ok(EnlistOutcome::AlreadyEnlisted);
        }

        if let Some(reason) = &self.doomed {
            let reason = format!("transaction is doomed: {reason}");
            connection.mark_failed(reason.clone());
            return Ok(EnlistOutcome::Failed { reason });
        }

        let commands = self.replay_commands().to_vec();
        for (replayed, command) in commands.iter().enumerate() {
            let failure = match send_and_wait(&connection, command, options.interrupt.as_ref()).await {
                Ok(result) if result.is_success() => None,
                Ok(result) => {
                    let message = result
                        .error_message()
                        .unwrap_or_else(|| "remote command failed".to_string());
                    Some(DxdbError::RemoteExecution {
                        connection: connection.id(),
                        message,
                    })
                }
                Err(e) => Some(e),
            };
            connection.forget_results().await;

            if let Some(e) = failure {
                let reason = format!("session replay failed at command {}: {e}", replayed + 1);
                connection.mark_failed(reason.clone());
                tracing::warn!("{} ({}): {}", connection.id(), connection.node(), reason);

                if matches!(e, DxdbError::Cancelled) || options.error_policy == RemoteErrorPolicy::Raise {
                    return Err(e);
                }
                return Ok(EnlistOutcome::Failed { reason });
            }
        }

        tracing::debug!(
            "Enlisted {} ({}) in {} after replaying {} commands",
            connection.id(),
            connection.node(),
            self.id,
            commands.len()
        );
        Ok(EnlistOutcome::Enlisted {
            replayed: commands.len(),
        })
    }

    pub fn outcome(&self) -> TransactionOutcome {
        if let Some(reason) = &self.doomed {
            return TransactionOutcome::Aborted {
                reason: reason.clone(),
            };
        }
        if self.ledger.all_failed() {
            return TransactionOutcome::Aborted {
                reason: format!("all {} remote connections failed", self.ledger.len()),
            };
        }

        let failed: Vec<ConnectionId> = self.ledger.failed().iter().map(|c| c.id()).collect();
        if failed.is_empty() {
            TransactionOutcome::Committable
        } else {
            TransactionOutcome::Degraded { failed }
        }
    }

    pub fn diagnostics(&self) -> Vec<ConnectionDiagnostic> {
        self.ledger
            .iter()
            .map(|c| ConnectionDiagnostic {
                connection: c.id(),
                node: c.node().clone(),
                status: c.status(),
                last_error: c.last_error(),
            })
            .collect()
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}
