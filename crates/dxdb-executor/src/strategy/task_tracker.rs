use super::ScanStrategy;
use crate::dispatcher::{DispatchMode, FragmentDispatcher};
use crate::explain::FragmentStatus;
use arrow_array::RecordBatch;
use async_trait::async_trait;
use dxdb_common::Result;
use dxdb_coordinator::CoordinatorSession;
use dxdb_planner::DistributedPlan;
use std::sync::Arc;

/// Runs the plan stage by stage. Intermediate stages only have to finish;
/// rows come from the last stage.
pub struct BatchCoordinatedScan {
    plan: Arc<DistributedPlan>,
    dispatcher: FragmentDispatcher,
    stages_done: usize,
}

impl BatchCoordinatedScan {
    pub fn new(plan: Arc<DistributedPlan>) -> Self {
        Self {
            plan,
            dispatcher: FragmentDispatcher::new(DispatchMode::Transactional),
            stages_done: 0,
        }
    }
}

#[async_trait]
impl ScanStrategy for BatchCoordinatedScan {
    async fn start(&mut self, session: &mut CoordinatorSession) -> Result<()> {
        let stages = self.plan.stages();
        let Some((last, intermediate)) = stages.split_last() else {
            return Ok(());
        };

        for &stage in intermediate {
            self.dispatcher.track(self.plan.fragments_in_stage(stage));
            self.dispatcher.start(session).await?;
            while self.dispatcher.next_result(session).await?.is_some() {}
            self.stages_done += 1;
            tracing::debug!("Stage {} of {} complete", stage, self.plan.query_id);
        }

        self.dispatcher.track(self.plan.fragments_in_stage(*last));
        self.dispatcher.start(session).await
    }

    async fn next_batches(&mut self, session: &mut CoordinatorSession) -> Result<Option<Vec<RecordBatch>>> {
        match self.dispatcher.next_result(session).await? {
            Some((_, result)) => Ok(Some(result.into_batches())),
            None => {
                self.stages_done = self.plan.stages().len();
                Ok(None)
            }
        }
    }

    async fn close(&mut self, session: &mut CoordinatorSession) {
        self.dispatcher.abandon(session).await;
    }

    fn fragment_statuses(&self) -> Vec<FragmentStatus> {
        self.dispatcher.statuses()
    }

    fn summary(&self) -> Option<String> {
        Some(format!(
            "{} of {} stages complete",
            self.stages_done,
            self.plan.stages().len()
        ))
    }
}
