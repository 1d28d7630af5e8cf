//! Transport-level session abstraction

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use dxdb_common::{NodeAddr, Result};

/// Outcome of one command as reported by the remote node
#[derive(Debug, Clone)]
pub enum RemoteResult {
    /// Utility command completed; `tag` is the command tag (`SET`, `INSERT 0 3`, ...)
    Command { tag: String },
    /// Query returned rows
    Tuples {
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    },
    /// Remote node rejected the command
    Error { sqlstate: String, message: String },
}

impl RemoteResult {
    pub fn error(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteResult::Error {
            sqlstate: sqlstate.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, RemoteResult::Error { .. })
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            RemoteResult::Error { sqlstate, message } => Some(format!("{message} ({sqlstate})")),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            RemoteResult::Tuples { batches, .. } => batches.iter().map(|b| b.num_rows()).sum(),
            _ => 0,
        }
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        match self {
            RemoteResult::Tuples { batches, .. } => batches,
            _ => Vec::new(),
        }
    }
}

/// One socket-level session to a remote node.
///
/// `send_command` and `take_result` never block; `wait_readable` is the only
/// suspension point and must be cancel safe so barriers can be interrupted.
#[async_trait]
pub trait RemoteSession: Send {
    /// Queue `command` for sending. Returns false if the transport refused it.
    fn send_command(&mut self, command: &str) -> bool;

    /// Resolves once a response (or a transport error) is available.
    async fn wait_readable(&mut self);

    /// Take the response to the last command.
    fn take_result(&mut self) -> Result<RemoteResult>;

    /// Drop any response that has not been consumed yet.
    fn forget_results(&mut self);
}

/// Opens sessions to remote nodes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, node: &NodeAddr) -> Result<Box<dyn RemoteSession>>;
}
