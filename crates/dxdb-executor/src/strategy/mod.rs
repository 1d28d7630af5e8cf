//! Remote-fetch algorithms behind a uniform scan interface

mod deferred_error;
mod insert_select;
mod router;
mod streaming;
mod task_tracker;

pub use deferred_error::DeferredErrorScan;
pub use insert_select::InsertSelectScan;
pub use router::RouterScan;
pub use streaming::StreamingScan;
pub use task_tracker::BatchCoordinatedScan;

use crate::explain::FragmentStatus;
use arrow_array::RecordBatch;
use async_trait::async_trait;
use dxdb_common::Result;
use dxdb_coordinator::CoordinatorSession;

/// One remote-fetch algorithm.
///
/// The scan state calls `start` once on the first pull, then `next_batches`
/// until it returns `None`, and `close` exactly once at the end.
#[async_trait]
pub trait ScanStrategy: Send {
    /// Open connections and issue the remote fragment queries.
    async fn start(&mut self, session: &mut CoordinatorSession) -> Result<()>;

    /// Batches from the next fragment that reported, or `None` when every
    /// fragment is done.
    async fn next_batches(&mut self, session: &mut CoordinatorSession) -> Result<Option<Vec<RecordBatch>>>;

    /// Release remote work that is still outstanding.
    async fn close(&mut self, session: &mut CoordinatorSession);

    fn fragment_statuses(&self) -> Vec<FragmentStatus>;

    /// One-line result summary for explain output
    fn summary(&self) -> Option<String> {
        None
    }
}
