//! DXDB Network - Remote sessions, connection pooling and wait barriers

pub mod connection;
pub mod pool;
pub mod session;
pub mod simulated;
pub mod wait;

pub use connection::{RemoteConnection, TransactionStatus};
pub use pool::ConnectionPool;
pub use session::{Connector, RemoteResult, RemoteSession};
pub use simulated::{SessionRecord, SimulatedCluster, SimulatedNode};
pub use wait::{send_and_wait, wait_for_all, wait_for_any};
