//! Fragment planner - place shard queries on nodes and build plans

use crate::plan::{DistributedPlan, Fragment, InsertTarget, PlanCategory};
use arrow_schema::SchemaRef;
use dxdb_common::{DxdbError, NodeAddr, Result};

/// Builds distributed plans from per-shard query texts
pub struct FragmentPlanner {
    nodes: Vec<NodeAddr>,
}

impl FragmentPlanner {
    pub fn new(nodes: Vec<NodeAddr>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[NodeAddr] {
        &self.nodes
    }

    /// Deterministic placement: shard index -> node index.
    pub fn place(&self, shard_queries: &[String], stage: u32, first_id: u32) -> Result<Vec<Fragment>> {
        if self.nodes.is_empty() {
            return Err(DxdbError::InvalidArgument(
                "no nodes available for fragment placement".to_string(),
            ));
        }

        Ok(shard_queries
            .iter()
            .enumerate()
            .map(|(i, query)| {
                let node = self.nodes[i % self.nodes.len()].clone();
                Fragment::new(first_id + i as u32, node, query.clone()).with_stage(stage)
            })
            .collect())
    }

    /// Multi-shard read, one fragment per shard query
    pub fn multi_shard(&self, shard_queries: &[String], schema: SchemaRef) -> Result<DistributedPlan> {
        let fragments = self.place(shard_queries, 0, 0)?;
        Ok(DistributedPlan::new(
            PlanCategory::MultiShardSelect,
            fragments,
            schema,
        ))
    }

    /// Single shard read on an explicit node
    pub fn single_shard(&self, node: NodeAddr, query: impl Into<String>, schema: SchemaRef) -> DistributedPlan {
        DistributedPlan::new(
            PlanCategory::SingleShard,
            vec![Fragment::new(0, node, query)],
            schema,
        )
    }

    /// Staged plan; every entry of `stages` is placed as its own stage,
    /// and the last one produces the result rows.
    pub fn repartition(&self, stages: &[Vec<String>], schema: SchemaRef) -> Result<DistributedPlan> {
        let mut fragments = Vec::new();
        for (stage, queries) in stages.iter().enumerate() {
            let placed = self.place(queries, stage as u32, fragments.len() as u32)?;
            fragments.extend(placed);
        }
        Ok(DistributedPlan::new(
            PlanCategory::Repartition,
            fragments,
            schema,
        ))
    }

    /// Insert-select: `shard_queries` read the source rows, `target` receives them
    pub fn insert_select(
        &self,
        shard_queries: &[String],
        source_schema: SchemaRef,
        target: InsertTarget,
    ) -> Result<DistributedPlan> {
        if target.shards.is_empty() {
            return Ok(DistributedPlan::invalid(
                "insert target has no shards",
            ));
        }
        if target.partition_column >= source_schema.fields().len() {
            return Ok(DistributedPlan::invalid(format!(
                "partition column {} out of range for {} selected columns",
                target.partition_column,
                source_schema.fields().len()
            )));
        }
        let fragments = self.place(shard_queries, 0, 0)?;
        Ok(DistributedPlan::new(PlanCategory::InsertSelect, fragments, source_schema)
            .with_insert_target(target))
    }
}

impl Default for FragmentPlanner {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ShardTarget;
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]))
    }

    fn queries(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SELECT id FROM t_{i}")).collect()
    }

    #[test]
    fn test_round_robin_placement() {
        let planner = FragmentPlanner::new(vec![NodeAddr::new("a", 1), NodeAddr::new("b", 1)]);
        let plan = planner.multi_shard(&queries(3), schema()).unwrap();

        assert_eq!(plan.fragments.len(), 3);
        assert_eq!(plan.fragments[0].node.host, "a");
        assert_eq!(plan.fragments[1].node.host, "b");
        assert_eq!(plan.fragments[2].node.host, "a");
        assert_eq!(plan.fragments[2].id.0, 2);
    }

    #[test]
    fn test_no_nodes() {
        let planner = FragmentPlanner::default();
        assert!(planner.multi_shard(&queries(1), schema()).is_err());
    }

    #[test]
    fn test_repartition_assigns_stages_and_unique_ids() {
        let planner = FragmentPlanner::new(vec![NodeAddr::new("a", 1)]);
        let plan = planner
            .repartition(&[queries(2), vec!["SELECT id FROM merged".to_string()]], schema())
            .unwrap();

        assert_eq!(plan.stages(), vec![0, 1]);
        let ids: Vec<u32> = plan.fragments.iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_insert_select_with_bad_partition_column_is_invalid() {
        let planner = FragmentPlanner::new(vec![NodeAddr::new("a", 1)]);
        let target = InsertTarget {
            partition_column: 4,
            shards: vec![ShardTarget {
                node: NodeAddr::new("a", 1),
                relation: "dst_1".to_string(),
            }],
        };
        let plan = planner.insert_select(&queries(1), schema(), target).unwrap();
        assert_eq!(plan.category, PlanCategory::Invalid);
        assert!(plan.planning_error.is_some());
    }
}
