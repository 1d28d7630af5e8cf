//! Distributed plan handed over by the host planner

use arrow_schema::{Schema, SchemaRef};
use dxdb_common::{FragmentId, NodeAddr, QueryId};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

/// Shape of a distributed plan, as tagged by the planner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlanCategory {
    /// Multi-shard read whose fragments can be pipelined
    MultiShardSelect,
    /// Needs intermediate task stages before the final fetch
    Repartition,
    /// Exactly one target shard
    SingleShard,
    /// Write sourced from a distributed read
    InsertSelect,
    /// Planning failed; the error is raised at execution time
    Invalid,
    /// Tag this coordinator does not know
    Unknown(String),
}

impl PlanCategory {
    pub fn tag(&self) -> &str {
        match self {
            PlanCategory::MultiShardSelect => "multi_shard",
            PlanCategory::Repartition => "repartition",
            PlanCategory::SingleShard => "single_shard",
            PlanCategory::InsertSelect => "insert_select",
            PlanCategory::Invalid => "invalid",
            PlanCategory::Unknown(tag) => tag,
        }
    }
}

impl FromStr for PlanCategory {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "multi_shard" | "real_time" => PlanCategory::MultiShardSelect,
            "repartition" | "task_tracker" => PlanCategory::Repartition,
            "single_shard" | "router" => PlanCategory::SingleShard,
            "insert_select" => PlanCategory::InsertSelect,
            "invalid" => PlanCategory::Invalid,
            _ => PlanCategory::Unknown(s.to_string()),
        })
    }
}

impl std::fmt::Display for PlanCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A sub-query sent to one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub node: NodeAddr,
    pub query: String,
    /// Execution stage; only the last stage produces result rows
    pub stage: u32,
}

impl Fragment {
    pub fn new(id: impl Into<FragmentId>, node: NodeAddr, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node,
            query: query.into(),
            stage: 0,
        }
    }

    pub fn with_stage(mut self, stage: u32) -> Self {
        self.stage = stage;
        self
    }
}

/// One shard of an insert target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTarget {
    pub node: NodeAddr,
    pub relation: String,
}

/// Where insert-select rows are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertTarget {
    /// Column of the selected rows that picks the target shard
    pub partition_column: usize,
    pub shards: Vec<ShardTarget>,
}

/// A planned distributed query
#[derive(Debug, Clone)]
pub struct DistributedPlan {
    pub query_id: QueryId,
    pub category: PlanCategory,
    pub fragments: Vec<Fragment>,
    /// Declared output shape of the scan
    pub output_schema: SchemaRef,
    /// Error recorded during planning, raised on first pull
    pub planning_error: Option<String>,
    pub insert_target: Option<InsertTarget>,
}

impl DistributedPlan {
    pub fn new(category: PlanCategory, fragments: Vec<Fragment>, output_schema: SchemaRef) -> Self {
        Self {
            query_id: QueryId::new(),
            category,
            fragments,
            output_schema,
            planning_error: None,
            insert_target: None,
        }
    }

    /// A plan that failed during planning
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            planning_error: Some(error.into()),
            ..Self::new(PlanCategory::Invalid, Vec::new(), Arc::new(Schema::empty()))
        }
    }

    pub fn with_insert_target(mut self, target: InsertTarget) -> Self {
        self.insert_target = Some(target);
        self
    }

    pub fn with_planning_error(mut self, error: impl Into<String>) -> Self {
        self.planning_error = Some(error.into());
        self
    }

    /// Per-fragment query texts in fragment order
    pub fn fragment_queries(&self) -> Vec<&str> {
        self.fragments.iter().map(|f| f.query.as_str()).collect()
    }

    /// Distinct stages in ascending order
    pub fn stages(&self) -> Vec<u32> {
        let mut stages: Vec<u32> = self.fragments.iter().map(|f| f.stage).collect();
        stages.sort_unstable();
        stages.dedup();
        stages
    }

    pub fn fragments_in_stage(&self, stage: u32) -> Vec<Fragment> {
        self.fragments
            .iter()
            .filter(|f| f.stage == stage)
            .cloned()
            .collect()
    }
}
