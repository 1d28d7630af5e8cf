use super::ScanStrategy;
use crate::explain::FragmentStatus;
use arrow_array::RecordBatch;
use async_trait::async_trait;
use dxdb_common::{DxdbError, Result};
use dxdb_coordinator::CoordinatorSession;
use dxdb_planner::DistributedPlan;

/// Placeholder for a plan that cannot run; raises the planning error on the
/// first pull without touching any connection.
pub struct DeferredErrorScan {
    message: String,
}

impl DeferredErrorScan {
    pub fn new(plan: &DistributedPlan) -> Self {
        let message = match &plan.planning_error {
            Some(error) => error.clone(),
            None => format!("no executable strategy for plan category {}", plan.category),
        };
        Self { message }
    }
}

#[async_trait]
impl ScanStrategy for DeferredErrorScan {
    async fn start(&mut self, _session: &mut CoordinatorSession) -> Result<()> {
        Err(DxdbError::InvalidPlan(self.message.clone()))
    }

    async fn next_batches(&mut self, _session: &mut CoordinatorSession) -> Result<Option<Vec<RecordBatch>>> {
        Err(DxdbError::InvalidPlan(self.message.clone()))
    }

    async fn close(&mut self, _session: &mut CoordinatorSession) {}

    fn fragment_statuses(&self) -> Vec<FragmentStatus> {
        Vec::new()
    }

    fn summary(&self) -> Option<String> {
        Some(format!("planning error: {}", self.message))
    }
}
