//! Plan category -> scan strategy table

use crate::strategy::{
    BatchCoordinatedScan, DeferredErrorScan, InsertSelectScan, RouterScan, ScanStrategy,
    StreamingScan,
};
use dxdb_common::CoordinatorConfig;
use dxdb_planner::{DistributedPlan, PlanCategory};
use std::sync::{Arc, OnceLock};

/// The closed set of remote-fetch algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Streaming,
    BatchCoordinated,
    SingleShardRouter,
    InsertSelectCoordinated,
    DeferredError,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Streaming,
        StrategyKind::BatchCoordinated,
        StrategyKind::SingleShardRouter,
        StrategyKind::InsertSelectCoordinated,
        StrategyKind::DeferredError,
    ];

    fn index(self) -> usize {
        match self {
            StrategyKind::Streaming => 0,
            StrategyKind::BatchCoordinated => 1,
            StrategyKind::SingleShardRouter => 2,
            StrategyKind::InsertSelectCoordinated => 3,
            StrategyKind::DeferredError => 4,
        }
    }
}

/// What a strategy does, for explain output and callers that care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StrategyCapabilities {
    /// Rows become available while other fragments are still running
    pub pipelined: bool,
    /// Connections are enlisted in the session's distributed transaction
    pub transactional: bool,
    /// Runs intermediate stages before the final fetch
    pub multi_stage: bool,
    pub writes: bool,
    /// Never contacts a remote node
    pub local_only: bool,
}

pub type StrategyFactory = fn(Arc<DistributedPlan>, &CoordinatorConfig) -> Box<dyn ScanStrategy>;

/// Entry point plus capability flags for one strategy
#[derive(Clone, Copy)]
pub struct StrategyDescriptor {
    pub kind: StrategyKind,
    pub name: &'static str,
    pub capabilities: StrategyCapabilities,
    pub factory: StrategyFactory,
}

impl std::fmt::Debug for StrategyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyDescriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Pick the strategy for `plan`. Total: anything unrecognised or invalid
/// becomes a deferred error.
pub fn select_strategy(plan: &DistributedPlan) -> StrategyKind {
    if plan.planning_error.is_some() {
        return StrategyKind::DeferredError;
    }
    match &plan.category {
        PlanCategory::MultiShardSelect => StrategyKind::Streaming,
        PlanCategory::Repartition => StrategyKind::BatchCoordinated,
        PlanCategory::SingleShard => StrategyKind::SingleShardRouter,
        PlanCategory::InsertSelect if plan.insert_target.is_some() => {
            StrategyKind::InsertSelectCoordinated
        }
        PlanCategory::InsertSelect | PlanCategory::Invalid | PlanCategory::Unknown(_) => {
            StrategyKind::DeferredError
        }
    }
}

fn streaming(plan: Arc<DistributedPlan>, _config: &CoordinatorConfig) -> Box<dyn ScanStrategy> {
    Box::new(StreamingScan::new(plan))
}

fn batch_coordinated(plan: Arc<DistributedPlan>, _config: &CoordinatorConfig) -> Box<dyn ScanStrategy> {
    Box::new(BatchCoordinatedScan::new(plan))
}

fn router(plan: Arc<DistributedPlan>, config: &CoordinatorConfig) -> Box<dyn ScanStrategy> {
    Box::new(RouterScan::new(plan, config.strict_router))
}

fn insert_select(plan: Arc<DistributedPlan>, _config: &CoordinatorConfig) -> Box<dyn ScanStrategy> {
    Box::new(InsertSelectScan::new(plan))
}

fn deferred_error(plan: Arc<DistributedPlan>, _config: &CoordinatorConfig) -> Box<dyn ScanStrategy> {
    Box::new(DeferredErrorScan::new(&plan))
}

/// Strategy table keyed by [`StrategyKind`]; always complete.
#[derive(Debug, Clone)]
pub struct ExecutionStrategyRegistry {
    descriptors: [StrategyDescriptor; 5],
}

impl ExecutionStrategyRegistry {
    pub fn with_defaults() -> Self {
        Self {
            descriptors: [
                StrategyDescriptor {
                    kind: StrategyKind::Streaming,
                    name: "Streaming",
                    capabilities: StrategyCapabilities {
                        pipelined: true,
                        transactional: true,
                        ..Default::default()
                    },
                    factory: streaming,
                },
                StrategyDescriptor {
                    kind: StrategyKind::BatchCoordinated,
                    name: "Batch Coordinated",
                    capabilities: StrategyCapabilities {
                        transactional: true,
                        multi_stage: true,
                        ..Default::default()
                    },
                    factory: batch_coordinated,
                },
                StrategyDescriptor {
                    kind: StrategyKind::SingleShardRouter,
                    name: "Router",
                    capabilities: StrategyCapabilities::default(),
                    factory: router,
                },
                StrategyDescriptor {
                    kind: StrategyKind::InsertSelectCoordinated,
                    name: "Insert Select",
                    capabilities: StrategyCapabilities {
                        transactional: true,
                        multi_stage: true,
                        writes: true,
                        ..Default::default()
                    },
                    factory: insert_select,
                },
                StrategyDescriptor {
                    kind: StrategyKind::DeferredError,
                    name: "Deferred Error",
                    capabilities: StrategyCapabilities {
                        local_only: true,
                        ..Default::default()
                    },
                    factory: deferred_error,
                },
            ],
        }
    }

    /// Process-wide registry with the built-in strategies
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<ExecutionStrategyRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::with_defaults)
    }

    /// Replace the descriptor for `descriptor.kind`, returning the old one.
    pub fn register(&mut self, descriptor: StrategyDescriptor) -> StrategyDescriptor {
        std::mem::replace(&mut self.descriptors[descriptor.kind.index()], descriptor)
    }

    pub fn descriptor(&self, kind: StrategyKind) -> &StrategyDescriptor {
        &self.descriptors[kind.index()]
    }

    pub fn resolve(&self, plan: &DistributedPlan) -> &StrategyDescriptor {
        self.descriptor(select_strategy(plan))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.descriptors.iter()
    }
}

impl Default for ExecutionStrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
