//! Per-execution scan state machine

use crate::explain::{FragmentState, FragmentStatus, ScanExplain};
use crate::registry::{StrategyDescriptor, StrategyKind};
use crate::strategy::ScanStrategy;
use crate::tuple_buffer::{Row, TupleBuffer};
use arrow_schema::{Schema, SchemaRef};
use dxdb_common::{CoordinatorConfig, DxdbError, Result};
use dxdb_coordinator::CoordinatorSession;
use dxdb_planner::DistributedPlan;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Opened, nothing sent yet
    Initialized,
    /// Fragments are running; rows are handed out as they arrive
    Fetching,
    /// Every fragment has reported; draining the buffer
    Buffered,
    Exhausted,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanPhase::Initialized => write!(f, "initialized"),
            ScanPhase::Fetching => write!(f, "fetching"),
            ScanPhase::Buffered => write!(f, "buffered"),
            ScanPhase::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// State of one distributed scan, from open to close.
///
/// The strategy is the only producer of the tuple buffer and the host,
/// through [`next`](Self::next), the only consumer.
pub struct DistributedScanState {
    plan: Arc<DistributedPlan>,
    descriptor: StrategyDescriptor,
    output_schema: SchemaRef,
    strategy: Box<dyn ScanStrategy>,
    phase: ScanPhase,
    remote_fetch_done: bool,
    buffer: TupleBuffer,
    error: Option<String>,
    closed: bool,
}

impl DistributedScanState {
    pub fn new(plan: Arc<DistributedPlan>, descriptor: &StrategyDescriptor, config: &CoordinatorConfig) -> Self {
        let strategy = (descriptor.factory)(plan.clone(), config);
        // Write strategies hand no rows to the host.
        let output_schema = if descriptor.capabilities.writes {
            Arc::new(Schema::empty())
        } else {
            plan.output_schema.clone()
        };
        let buffer = TupleBuffer::new(output_schema.clone());
        Self {
            plan,
            descriptor: *descriptor,
            output_schema,
            strategy,
            phase: ScanPhase::Initialized,
            remote_fetch_done: false,
            buffer,
            error: None,
            closed: false,
        }
    }

    /// Pull the next row. `None` at end of results.
    ///
    /// An error aborts the scan: remote work is released, buffered rows are
    /// dropped and every later pull returns `None`.
    pub async fn next(&mut self, session: &mut CoordinatorSession) -> Result<Option<Row>> {
        match self.step(session).await {
            Ok(row) => Ok(row),
            Err(e) => {
                self.abort(session, &e).await;
                Err(e)
            }
        }
    }

    async fn step(&mut self, session: &mut CoordinatorSession) -> Result<Option<Row>> {
        loop {
            match self.phase {
                ScanPhase::Initialized => {
                    self.phase = ScanPhase::Fetching;
                    self.strategy.start(session).await?;
                }
                ScanPhase::Fetching => {
                    if let Some(row) = self.buffer.pop_row() {
                        return Ok(Some(row));
                    }
                    match self.strategy.next_batches(session).await? {
                        Some(batches) => {
                            for batch in batches {
                                self.buffer.push(batch)?;
                            }
                        }
                        None => {
                            self.remote_fetch_done = true;
                            self.phase = ScanPhase::Buffered;
                        }
                    }
                }
                ScanPhase::Buffered => {
                    if let Some(row) = self.buffer.pop_row() {
                        return Ok(Some(row));
                    }
                    self.phase = ScanPhase::Exhausted;
                    self.release(session).await;
                }
                ScanPhase::Exhausted => return Ok(None),
            }
        }
    }

    async fn abort(&mut self, session: &mut CoordinatorSession, error: &DxdbError) {
        tracing::warn!(
            "Distributed scan {} ({}) aborted: {}",
            self.plan.query_id,
            self.descriptor.name,
            error
        );
        self.release(session).await;
        if matches!(error, DxdbError::Cancelled) {
            session.reset_interrupt();
        }
        self.buffer.clear();
        self.phase = ScanPhase::Exhausted;
        self.error = Some(error.to_string());
    }

    async fn release(&mut self, session: &mut CoordinatorSession) {
        if !self.closed {
            self.closed = true;
            self.strategy.close(session).await;
        }
    }

    /// Tear the scan down; safe to call at any phase and more than once.
    pub async fn close(&mut self, session: &mut CoordinatorSession) {
        self.release(session).await;
        self.buffer.clear();
        self.phase = ScanPhase::Exhausted;
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn remote_fetch_done(&self) -> bool {
        self.remote_fetch_done
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.descriptor.kind
    }

    pub fn strategy_name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn plan(&self) -> &Arc<DistributedPlan> {
        &self.plan
    }

    /// Shape of the rows `next` returns: the plan's declared output, or no
    /// columns for strategies that only write
    pub fn tuple_descriptor(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    pub fn rows_fetched(&self) -> usize {
        self.buffer.rows_appended()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn explain(&self) -> ScanExplain {
        let fragments = match self.phase {
            ScanPhase::Initialized => self
                .plan
                .fragments
                .iter()
                .map(|f| FragmentStatus {
                    fragment: f.id,
                    node: f.node.clone(),
                    query: f.query.clone(),
                    state: FragmentState::Pending,
                })
                .collect(),
            _ => self.strategy.fragment_statuses(),
        };
        ScanExplain {
            strategy: self.descriptor.name,
            category: self.plan.category.to_string(),
            phase: self.phase,
            capabilities: self.descriptor.capabilities,
            fragments,
            summary: self.strategy.summary(),
            error: self.error.clone(),
        }
    }
}

impl std::fmt::Debug for DistributedScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedScanState")
            .field("query_id", &self.plan.query_id)
            .field("strategy", &self.descriptor.name)
            .field("phase", &self.phase)
            .field("remote_fetch_done", &self.remote_fetch_done)
            .finish()
    }
}
