//! Broadcast of session-altering commands to enlisted connections

use crate::ledger::RemoteTransactionLedger;
use dxdb_common::{ConnectionId, DxdbError, NodeAddr, RemoteErrorPolicy, Result};
use dxdb_network::{wait_for_all, RemoteConnection};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Caller-supplied broadcast behaviour
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    pub error_policy: RemoteErrorPolicy,
    /// Interrupt observed while waiting on the barrier
    pub interrupt: Option<CancellationToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Submission,
    RemoteExecution,
    Interrupted,
}

/// One connection that did not accept a command
#[derive(Debug, Clone)]
pub struct ConnectionFailure {
    pub connection: ConnectionId,
    pub node: NodeAddr,
    pub kind: FailureKind,
    pub message: String,
}

impl ConnectionFailure {
    fn new(connection: &RemoteConnection, kind: FailureKind, message: String) -> Self {
        Self {
            connection: connection.id(),
            node: connection.node().clone(),
            kind,
            message,
        }
    }

    pub fn to_error(&self) -> DxdbError {
        match self.kind {
            FailureKind::Submission => DxdbError::Submission {
                connection: self.connection,
                message: self.message.clone(),
            },
            FailureKind::RemoteExecution => DxdbError::RemoteExecution {
                connection: self.connection,
                message: self.message.clone(),
            },
            FailureKind::Interrupted => DxdbError::Cancelled,
        }
    }
}

impl std::fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.connection, self.node, self.message)
    }
}

/// Aggregate result of one broadcast
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    /// Command as appended to the replay log
    pub command: String,
    /// Connections that acknowledged the command
    pub delivered: Vec<ConnectionId>,
    /// Connections skipped because they had already failed
    pub skipped: usize,
    /// Connections that failed during this broadcast
    pub failures: Vec<ConnectionFailure>,
}

impl BroadcastReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, connection: &RemoteConnection, kind: FailureKind, message: String) {
        let failure = ConnectionFailure::new(connection, kind, message);
        if connection.mark_failed(failure.message.clone()) {
            tracing::warn!("Session broadcast failed on {}", failure);
        }
        self.failures.push(failure);
    }
}

/// Send `command` to every non-failed connection of `ledger` and collect
/// the responses.
///
/// Per-connection failures mark the connection failed and land in the
/// report. An interrupt during the barrier settles every outstanding
/// connection and returns `Cancelled`.
pub(crate) async fn broadcast_to_ledger(
    ledger: &RemoteTransactionLedger,
    command: &str,
    options: &BroadcastOptions,
) -> Result<BroadcastReport> {
    let mut report = BroadcastReport::new(command);

    // Phase 1: fan out.
    let mut wait_set: Vec<Arc<RemoteConnection>> = Vec::with_capacity(ledger.len());
    for connection in ledger.iter() {
        if connection.is_failed() {
            report.skipped += 1;
            continue;
        }

        if connection.submit(command).await {
            wait_set.push(connection.clone());
        } else {
            report.record_failure(
                connection,
                FailureKind::Submission,
                format!("could not send command to {}", connection.node()),
            );
        }
    }

    if let Err(e) = wait_for_all(&wait_set, options.interrupt.as_ref()).await {
        settle_interrupted(&wait_set, &mut report).await;
        return Err(e);
    }

    // Phase 2: fan in. Keep going past failures.
    for connection in &wait_set {
        if connection.is_failed() {
            continue;
        }

        match connection.retrieve_result().await {
            Ok(result) if result.is_success() => report.delivered.push(connection.id()),
            Ok(result) => {
                let message = result
                    .error_message()
                    .unwrap_or_else(|| "remote command failed".to_string());
                report.record_failure(connection, FailureKind::RemoteExecution, message);
            }
            Err(e) => report.record_failure(connection, FailureKind::RemoteExecution, e.to_string()),
        }
        connection.forget_results().await;
    }

    Ok(report)
}

/// After an interrupt only connections with a confirmed success stay active.
async fn settle_interrupted(wait_set: &[Arc<RemoteConnection>], report: &mut BroadcastReport) {
    for connection in wait_set {
        match connection.retrieve_result().await {
            Ok(result) if result.is_success() => report.delivered.push(connection.id()),
            Ok(result) => {
                let message = result
                    .error_message()
                    .unwrap_or_else(|| "remote command failed".to_string());
                report.record_failure(connection, FailureKind::RemoteExecution, message);
            }
            Err(_) => report.record_failure(
                connection,
                FailureKind::Interrupted,
                "interrupted before the command was acknowledged".to_string(),
            ),
        }
        connection.forget_results().await;
    }
}

/// Pick the error a broadcast returns under `policy`, if any.
pub(crate) fn escalate(report: &BroadcastReport, policy: RemoteErrorPolicy) -> Option<DxdbError> {
    match policy {
        RemoteErrorPolicy::Warn => None,
        RemoteErrorPolicy::Raise => report.failures.first().map(ConnectionFailure::to_error),
    }
}
