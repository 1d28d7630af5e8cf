use super::ScanStrategy;
use crate::dispatcher::{DispatchMode, FragmentDispatcher};
use crate::explain::FragmentStatus;
use arrow_array::RecordBatch;
use async_trait::async_trait;
use dxdb_common::Result;
use dxdb_coordinator::CoordinatorSession;
use dxdb_planner::DistributedPlan;
use std::sync::Arc;

/// Fans every fragment out at once and hands batches over in arrival order.
pub struct StreamingScan {
    plan: Arc<DistributedPlan>,
    dispatcher: FragmentDispatcher,
}

impl StreamingScan {
    pub fn new(plan: Arc<DistributedPlan>) -> Self {
        Self {
            plan,
            dispatcher: FragmentDispatcher::new(DispatchMode::Transactional),
        }
    }
}

#[async_trait]
impl ScanStrategy for StreamingScan {
    async fn start(&mut self, session: &mut CoordinatorSession) -> Result<()> {
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
