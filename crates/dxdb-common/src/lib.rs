//! DXDB Common - Shared types, errors, and configuration

pub mod config;
pub mod error;
pub mod types;

pub use config::{CoordinatorConfig, NodeAddr, RemoteErrorPolicy};
pub use error::{DxdbError, Result};
pub use types::{ConnectionId, FragmentId, QueryId, TransactionId};
