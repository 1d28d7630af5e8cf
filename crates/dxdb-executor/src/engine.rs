//! Host-facing entry points for distributed scans

use crate::explain::ScanExplain;
use crate::registry::ExecutionStrategyRegistry;
use crate::scan_state::DistributedScanState;
use crate::tuple_buffer::Row;
use arrow_schema::SchemaRef;
use dxdb_common::Result;
use dxdb_coordinator::CoordinatorSession;
use dxdb_planner::DistributedPlan;
use std::sync::Arc;

/// Opens, drives and closes distributed scans using a strategy registry
pub struct DistributedExecutor<'r> {
    registry: &'r ExecutionStrategyRegistry,
}

impl DistributedExecutor<'static> {
    pub fn new() -> Self {
        Self::with_registry(ExecutionStrategyRegistry::global())
    }
}

impl Default for DistributedExecutor<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r> DistributedExecutor<'r> {
    pub fn with_registry(registry: &'r ExecutionStrategyRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExecutionStrategyRegistry {
        self.registry
    }

    /// Pick a strategy for `plan` and create its scan state. Nothing is sent
    /// to remote nodes until the first [`next`](Self::next).
    pub fn open(&self, plan: Arc<DistributedPlan>, session: &CoordinatorSession) -> DistributedScanState {
        let descriptor = self.registry.resolve(&plan);
        tracing::info!(
            "Executing {} ({}) with {} strategy",
            plan.query_id,
            plan.category,
            descriptor.name
        );
        DistributedScanState::new(plan, descriptor, session.config())
    }

    pub async fn next(&self, state: &mut DistributedScanState, session: &mut CoordinatorSession) -> Result<Option<Row>> {
        state.next(session).await
    }

    pub async fn close(&self, state: &mut DistributedScanState, session: &mut CoordinatorSession) {
        state.close(session).await
    }

    pub fn explain(&self, state: &DistributedScanState) -> ScanExplain {
        state.explain()
    }

    pub fn tuple_descriptor(&self, state: &DistributedScanState) -> SchemaRef {
        state.tuple_descriptor()
    }

    /// Run a plan to completion and return every row
    pub async fn collect(&self, plan: Arc<DistributedPlan>, session: &mut CoordinatorSession) -> Result<Vec<Row>> {
        let mut state = self.open(plan, session);
        let mut rows = Vec::new();
        while let Some(row) = state.next(session).await? {
            rows.push(row);
        }
        state.close(session).await;
        Ok(rows)
    }
}
