use super::ScanStrategy;
use crate::dispatcher::{DispatchMode, FragmentDispatcher};
use crate::explain::FragmentStatus;
use arrow::util::display::array_value_to_string;
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::DataType;
use async_trait::async_trait;
use dxdb_common::{DxdbError, Result};
use dxdb_coordinator::CoordinatorSession;
use dxdb_network::RemoteResult;
use dxdb_planner::{DistributedPlan, Fragment, InsertTarget};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Reads the source fragments to completion, routes every row to its target
/// shard and writes the rows with one INSERT per shard. Yields no rows.
pub struct InsertSelectScan {
    plan: Arc<DistributedPlan>,
    dispatcher: FragmentDispatcher,
    rows_read: usize,
    inserted: usize,
}

impl InsertSelectScan {
    pub fn new(plan: Arc<DistributedPlan>) -> Self {
        Self {
            plan,
            dispatcher: FragmentDispatcher::new(DispatchMode::Transactional),
            rows_read: 0,
            inserted: 0,
        }
    }

    fn target(&self) -> Result<&InsertTarget> {
        match &self.plan.insert_target {
            Some(target) if !target.shards.is_empty() => Ok(target),
            _ => Err(DxdbError::InvalidPlan(
                "insert-select plan has no target shards".to_string(),
            )),
        }
    }

    fn route(&self, batches: Vec<RecordBatch>, routed: &mut [Vec<String>]) -> Result<usize> {
        let target = self.target()?;
        let mut rows = 0;
        for batch in batches {
            if target.partition_column >= batch.num_columns() {
                return Err(DxdbError::InvalidPlan(format!(
                    "partition column {} out of range for {} selected columns",
                    target.partition_column,
                    batch.num_columns()
                )));
            }
            for row in 0..batch.num_rows() {
                let key = sql_literal(batch.column(target.partition_column), row)?;
                let shard = (xxh3_64(key.as_bytes()) % routed.len() as u64) as usize;
                let values = batch
                    .columns()
                    .iter()
                    .map(|column| sql_literal(column, row))
                    .collect::<Result<Vec<_>>>()?;
                routed[shard].push(format!("({})", values.join(", ")));
                rows += 1;
            }
        }
        Ok(rows)
    }
}

/// Render one value as a SQL literal
fn sql_literal(column: &ArrayRef, row: usize) -> Result<String> {
    if column.is_null(row) {
        return Ok("NULL".to_string());
    }
    let value = array_value_to_string(column, row)?;
    if column.data_type().is_numeric() || column.data_type() == &DataType::Boolean {
        Ok(value)
    } else {
        Ok(format!("'{}'", value.replace('\'', "''")))
    }
}

/// Row count from an `INSERT <oid> <rows>` command tag
fn inserted_rows(result: &RemoteResult) -> usize {
    match result {
        RemoteResult::Command { tag } if tag.starts_with("INSERT") => tag
            .split_whitespace()
            .last()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl ScanStrategy for InsertSelectScan {
    async fn start(&mut self, session: &mut CoordinatorSession) -> Result<()> {
        let shard_count = self.target()?.shards.len();

        self.dispatcher.track(self.plan.fragments.iter().cloned());
        self.dispatcher.start(session).await?;
        let mut routed = vec![Vec::new(); shard_count];
        while let Some((_, result)) = self.dispatcher.next_result(session).await? {
            let rows = self.route(result.into_batches(), &mut routed)?;
            self.rows_read += rows;
        }

        let first_id = self
            .plan
            .fragments
            .iter()
            .map(|f| f.id.0 + 1)
            .max()
            .unwrap_or(0);
        let target = self.target()?;
        let writes: Vec<Fragment> = target
            .shards
            .iter()
            .zip(routed)
            .filter(|(_, rows)| !rows.is_empty())
            .enumerate()
            .map(|(i, (shard, rows))| {
                Fragment::new(
                    first_id + i as u32,
                    shard.node.clone(),
                    format!("INSERT INTO {} VALUES {};", shard.relation, rows.join(", ")),
                )
                .with_stage(1)
            })
            .collect();
        tracing::debug!(
            "Routing {} rows of {} to {} shards",
            self.rows_read,
            self.plan.query_id,
            writes.len()
        );

        self.dispatcher.track(writes);
        self.dispatcher.start(session).await?;
        while let Some((_, result)) = self.dispatcher.next_result(session).await? {
            self.inserted += inserted_rows(&result);
        }
        Ok(())
    }

    async fn next_batches(&mut self, _session: &mut CoordinatorSession) -> Result<Option<Vec<RecordBatch>>> {
        Ok(None)
    }

    async fn close(&mut self, session: &mut CoordinatorSession) {
        self.dispatcher.abandon(session).await;
    }

    fn fragment_statuses(&self) -> Vec<FragmentStatus> {
        self.dispatcher.statuses()
    }

    fn summary(&self) -> Option<String> {
        Some(format!("inserted {} of {} rows", self.inserted, self.rows_read))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Float64Array, StringArray};

    #[test]
    fn test_sql_literals() {
        let numbers: ArrayRef = Arc::new(Float64Array::from(vec![Some(1.5), None]));
        let names: ArrayRef = Arc::new(StringArray::from(vec!["o'hara"]));
        assert_eq!(sql_literal(&numbers, 0).unwrap(), "1.5");
        assert_eq!(sql_literal(&numbers, 1).unwrap(), "NULL");
        assert_eq!(sql_literal(&names, 0).unwrap(), "'o''hara'");
    }

    #[test]
    fn test_inserted_rows_from_tag() {
        let tag = |t: &str| RemoteResult::Command { tag: t.to_string() };
        assert_eq!(inserted_rows(&tag("INSERT 0 7")), 7);
        assert_eq!(inserted_rows(&tag("SET")), 0);
        assert_eq!(inserted_rows(&RemoteResult::error("XX000", "boom")), 0);
    }
}
