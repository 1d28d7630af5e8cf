//! DXDB Coordinator - Distributed transaction state and session broadcast

pub mod ledger;
pub mod replay_log;
pub mod session;
pub mod transaction;
pub mod variable_set;

pub use ledger::RemoteTransactionLedger;
pub use replay_log::{normalize_command, SessionReplayLog, STATEMENT_TERMINATOR};
pub use session::CoordinatorSession;
pub use transaction::{ConnectionDiagnostic, EnlistOutcome, TransactionContext, TransactionOutcome};
pub use variable_set::{BroadcastOptions, BroadcastReport, ConnectionFailure, FailureKind};
