use super::ScanStrategy;
use crate::dispatcher::{DispatchMode, FragmentDispatcher};
use crate::explain::FragmentStatus;
use arrow_array::RecordBatch;
use async_trait::async_trait;
use dxdb_common::{DxdbError, Result};
use dxdb_coordinator::CoordinatorSession;
use dxdb_planner::DistributedPlan;
use std::sync::Arc;

/// Forwards a single-shard plan straight to its node. The transaction
/// ledger and replay log are never consulted.
pub struct RouterScan {
    plan: Arc<DistributedPlan>,
    strict: bool,
    dispatcher: FragmentDispatcher,
}

impl RouterScan {
    pub fn new(plan: Arc<DistributedPlan>, strict: bool) -> Self {
        Self {
            plan,
            strict,
            dispatcher: FragmentDispatcher::new(DispatchMode::Direct),
        }
    }
}

#[async_trait]
impl ScanStrategy for RouterScan {
    async fn start(&mut self, session: &mut CoordinatorSession) -> Result<()> {
        let count = self.plan.fragments.len();
        if count == 0 || (self.strict && count != 1) {
            return Err(DxdbError::InvalidPlan(format!(
                "router plan must target exactly one shard, got {count} fragments"
            )));
        }
        self.dispatcher.track(self.plan.fragments.iter().cloned());
        self.dispatcher.start(session).await
    }

    async fn next_batches(&mut self, session: &mut CoordinatorSession) -> Result<Option<Vec<RecordBatch>>> {
        Ok(self
            .dispatcher
            .next_result(session)
            .await?
            .map(|(_, result)| result.into_batches()))
    }

    async fn close(&mut self, session: &mut CoordinatorSession) {
        self.dispatcher.abandon(session).await;
    }

    fn fragment_statuses(&self) -> Vec<FragmentStatus> {
        self.dispatcher.statuses()
    }
}
