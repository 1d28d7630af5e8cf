//! DXDB Planner - Distributed plan model and fragment placement

pub mod fragment_planner;
pub mod plan;

pub use fragment_planner::FragmentPlanner;
pub use plan::{DistributedPlan, Fragment, InsertTarget, PlanCategory, ShardTarget};
