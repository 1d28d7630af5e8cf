//! DXDB Error types

use crate::types::ConnectionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DxdbError {
    /// The command could not be handed to the transport.
    #[error("Submission failed on {connection}: {message}")]
    Submission {
        connection: ConnectionId,
        message: String,
    },

    /// The command was delivered but the remote node reported an error.
    #[error("Remote execution failed on {connection}: {message}")]
    RemoteExecution {
        connection: ConnectionId,
        message: String,
    },

    #[error("Canceling statement due to user request")]
    Cancelled,

    #[error("Invalid distributed plan: {0}")]
    InvalidPlan(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl DxdbError {
    /// Failures that are isolated to one connection and do not abort sibling work.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            DxdbError::Submission { .. } | DxdbError::RemoteExecution { .. }
        )
    }

    /// The connection a connection-local failure belongs to.
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            DxdbError::Submission { connection, .. }
            | DxdbError::RemoteExecution { connection, .. } => Some(*connection),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DxdbError>;
