//! DXDB Executor - Distributed scan execution

pub mod dispatcher;
pub mod engine;
pub mod explain;
pub mod registry;
pub mod scan_state;
pub mod strategy;
pub mod tuple_buffer;

pub use dispatcher::{DispatchMode, FragmentDispatcher};
pub use engine::DistributedExecutor;
pub use explain::{FragmentState, FragmentStatus, ScanExplain};
pub use registry::{
    select_strategy, ExecutionStrategyRegistry, StrategyCapabilities, StrategyDescriptor,
    StrategyFactory, StrategyKind,
};
pub use scan_state::{DistributedScanState, ScanPhase};
pub use strategy::{
    BatchCoordinatedScan, DeferredErrorScan, InsertSelectScan, RouterScan, ScanStrategy,
    StreamingScan,
};
pub use tuple_buffer::{Row, TupleBuffer};
