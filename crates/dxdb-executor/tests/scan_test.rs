use std::sync::Arc;
use std::time::Duration;

use arrow_array::{Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use dxdb_common::{CoordinatorConfig, DxdbError, NodeAddr};
use dxdb_coordinator::{CoordinatorSession, TransactionOutcome};
use dxdb_executor::{DistributedExecutor, FragmentState, ScanPhase, StrategyKind};
use dxdb_network::{SimulatedCluster, SimulatedNode, TransactionStatus};
use dxdb_planner::{
    DistributedPlan, Fragment, FragmentPlanner, InsertTarget, PlanCategory, ShardTarget,
};

struct Harness {
    nodes: Vec<Arc<SimulatedNode>>,
    session: CoordinatorSession,
}

impl Harness {
    fn new(node_count: usize) -> Self {
        Self::with_config(node_count, CoordinatorConfig::default())
    }

    fn with_config(node_count: usize, config: CoordinatorConfig) -> Self {
        let cluster = Arc::new(SimulatedCluster::new());
        let nodes = (0..node_count)
            .map(|i| cluster.add_node(NodeAddr::new(format!("worker{i}"), 5432)))
            .collect();
        let session = CoordinatorSession::new(config, cluster);
        Self { nodes, session }
    }

    fn addrs(&self) -> Vec<NodeAddr> {
        self.nodes.iter().map(|n| n.addr().clone()).collect()
    }

    fn planner(&self) -> FragmentPlanner {
        FragmentPlanner::new(self.addrs())
    }
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]))
}

fn batch(ids: &[i64]) -> RecordBatch {
    let names: Vec<String> = ids.iter().map(|i| format!("row_{i}")).collect();
    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(names)),
        ],
    )
    .unwrap()
}

fn shard_query(shard: usize) -> String {
    format!("SELECT id, name FROM t_{shard}")
}

/// Registers `rows[i]` as the result of shard `i` on the node it is placed on.
fn serve_shards(h: &Harness, rows: &[&[i64]]) -> Vec<String> {
    let queries: Vec<String> = (0..rows.len()).map(shard_query).collect();
    for (i, ids) in rows.iter().enumerate() {
        h.nodes[i % h.nodes.len()].add_query_result(queries[i].clone(), vec![batch(ids)]);
    }
    queries
}

fn ids(rows: &[dxdb_executor::Row]) -> Vec<i64> {
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|r| r.value_string(0).unwrap().parse().unwrap())
        .collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_streaming_scan_walks_every_phase() {
    let mut h = Harness::new(3);
    let queries = serve_shards(&h, &[&[1, 2], &[3], &[4, 5, 6]]);
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    let executor = DistributedExecutor::new();
    let mut state = executor.open(plan.clone(), &h.session);
    assert_eq!(state.strategy_kind(), StrategyKind::Streaming);
    assert_eq!(state.phase(), ScanPhase::Initialized);
    assert_eq!(executor.tuple_descriptor(&state), plan.output_schema);
    assert!(h.nodes.iter().all(|n| n.session_count() == 0));

    let mut rows = Vec::new();
    while let Some(row) = executor.next(&mut state, &mut h.session).await.unwrap() {
        assert!(matches!(state.phase(), ScanPhase::Fetching | ScanPhase::Buffered));
        rows.push(row);
    }

    assert_eq!(ids(&rows), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(state.phase(), ScanPhase::Exhausted);
    assert!(state.remote_fetch_done());
    assert_eq!(state.rows_fetched(), 6);
    assert!(executor.next(&mut state, &mut h.session).await.unwrap().is_none());

    let explain = executor.explain(&state);
    assert_eq!(explain.fragments.len(), 3);
    assert!(explain
        .fragments
        .iter()
        .all(|f| matches!(f.state, FragmentState::Completed { .. })));
    executor.close(&mut state, &mut h.session).await;
}

#[tokio::test]
async fn test_streaming_scan_replays_session_commands_on_join() {
    let mut h = Harness::new(2);
    let queries = serve_shards(&h, &[&[1], &[2]]);
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    h.session.begin().unwrap();
    let report = h
        .session
        .process_variable_set("SET search_path = app")
        .await
        .unwrap()
        .unwrap();
    assert!(report.delivered.is_empty());

    let rows = DistributedExecutor::new()
        .collect(plan, &mut h.session)
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec![1, 2]);

    for node in &h.nodes {
        let commands = node.last_session_commands();
        assert_eq!(commands[0], "SET search_path = app;");
        assert_eq!(
            node.last_session_variables().get("search_path").map(String::as_str),
            Some("app")
        );
    }
    assert_eq!(h.session.transaction().unwrap().ledger().len(), 2);
}

#[tokio::test]
async fn test_fragments_on_one_node_share_a_connection() {
    let mut h = Harness::new(1);
    let queries = serve_shards(&h, &[&[1], &[2], &[3]]);
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    let rows = DistributedExecutor::new()
        .collect(plan, &mut h.session)
        .await
        .unwrap();

    assert_eq!(ids(&rows), vec![1, 2, 3]);
    assert_eq!(h.nodes[0].session_count(), 1);
    assert_eq!(h.nodes[0].last_session_commands(), queries);
}

#[tokio::test]
async fn test_batch_coordinated_scan_finishes_stages_in_order() {
    let mut h = Harness::new(2);
    let stage0: Vec<String> = (0..2)
        .map(|i| format!("CREATE TABLE repart_{i} AS SELECT * FROM t_{i}"))
        .collect();
    let stage1: Vec<String> = (0..2)
        .map(|i| format!("SELECT id, name FROM repart_{i}"))
        .collect();
    h.nodes[0].add_query_result(stage1[0].clone(), vec![batch(&[10, 11])]);
    h.nodes[1].add_query_result(stage1[1].clone(), vec![batch(&[12])]);
    let plan = Arc::new(
        h.planner()
            .repartition(&[stage0.clone(), stage1.clone()], schema())
            .unwrap(),
    );

    let executor = DistributedExecutor::new();
    let mut state = executor.open(plan, &h.session);
    assert_eq!(state.strategy_kind(), StrategyKind::BatchCoordinated);

    let mut rows = Vec::new();
    while let Some(row) = state.next(&mut h.session).await.unwrap() {
        rows.push(row);
    }
    assert_eq!(ids(&rows), vec![10, 11, 12]);

    for (i, node) in h.nodes.iter().enumerate() {
        assert_eq!(
            node.last_session_commands(),
            vec![stage0[i].clone(), stage1[i].clone()]
        );
    }
    let explain = state.explain();
    assert_eq!(explain.fragments.len(), 4);
    assert_eq!(explain.summary.as_deref(), Some("2 of 2 stages complete"));
}

#[tokio::test]
async fn test_router_scan_bypasses_transaction_state() {
    let mut h = Harness::new(2);
    let query = shard_query(0);
    h.nodes[1].add_query_result(query.clone(), vec![batch(&[7])]);
    let plan = Arc::new(h.planner().single_shard(h.nodes[1].addr().clone(), query.clone(), schema()));

    h.session.begin().unwrap();
    h.session
        .process_variable_set("SET work_mem = '64MB'")
        .await
        .unwrap();

    let executor = DistributedExecutor::new();
    let mut state = executor.open(plan, &h.session);
    assert_eq!(state.strategy_kind(), StrategyKind::SingleShardRouter);

    let mut rows = Vec::new();
    while let Some(row) = state.next(&mut h.session).await.unwrap() {
        rows.push(row);
    }
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values().unwrap(), vec!["7".to_string(), "row_7".to_string()]);

    let txn = h.session.transaction().unwrap();
    assert!(txn.ledger().is_empty());
    assert_eq!(txn.replay_commands().len(), 1);
    assert_eq!(h.nodes[1].last_session_commands(), vec![query]);
    assert_eq!(h.nodes[0].session_count(), 0);
    assert_eq!(state.explain().fragments.len(), 1);
}

#[tokio::test]
async fn test_strict_router_rejects_multi_fragment_plan() {
    let mut h = Harness::new(2);
    let fragments = h
        .addrs()
        .into_iter()
        .enumerate()
        .map(|(i, node)| Fragment::new(i as u32, node, shard_query(i)))
        .collect();
    let plan = Arc::new(DistributedPlan::new(PlanCategory::SingleShard, fragments, schema()));

    let mut state = DistributedExecutor::new().open(plan, &h.session);
    let err = state.next(&mut h.session).await.unwrap_err();
    assert!(matches!(err, DxdbError::InvalidPlan(_)));
    assert!(h.nodes.iter().all(|n| n.session_count() == 0));
}

#[tokio::test]
async fn test_deferred_error_raises_on_first_pull() {
    let mut h = Harness::new(1);
    let plan = Arc::new(DistributedPlan::invalid("relation \"missing\" does not exist"));

    let mut state = DistributedExecutor::new().open(plan, &h.session);
    assert_eq!(state.strategy_kind(), StrategyKind::DeferredError);

    match state.next(&mut h.session).await {
        Err(DxdbError::InvalidPlan(message)) => assert!(message.contains("missing")),
        other => panic!("expected invalid plan error, got {other:?}"),
    }
    assert_eq!(state.phase(), ScanPhase::Exhausted);
    assert!(state.next(&mut h.session).await.unwrap().is_none());
    assert_eq!(h.nodes[0].session_count(), 0);
    assert!(state.explain().error.is_some());
}

#[tokio::test]
async fn test_unknown_category_is_deferred_error() {
    let mut h = Harness::new(1);
    let fragments = vec![Fragment::new(0, h.addrs()[0].clone(), shard_query(0))];
    let plan = Arc::new(DistributedPlan::new(
        PlanCategory::Unknown("adaptive".to_string()),
        fragments,
        schema(),
    ));

    let mut state = DistributedExecutor::new().open(plan, &h.session);
    assert_eq!(state.strategy_kind(), StrategyKind::DeferredError);
    let err = state.next(&mut h.session).await.unwrap_err();
    assert!(matches!(err, DxdbError::InvalidPlan(_)));
    assert_eq!(h.nodes[0].session_count(), 0);
}

#[tokio::test]
async fn test_insert_select_routes_rows_to_target_shards() {
    let mut h = Harness::new(2);
    let queries = serve_shards(&h, &[&[1, 2, 3], &[4, 5, 6]]);
    let target = InsertTarget {
        partition_column: 0,
        shards: h
            .addrs()
            .into_iter()
            .enumerate()
            .map(|(i, node)| ShardTarget {
                node,
                relation: format!("dst_{i}"),
            })
            .collect(),
    };
    let plan = Arc::new(
        h.planner()
            .insert_select(&queries, schema(), target)
            .unwrap(),
    );

    h.session.begin().unwrap();
    let executor = DistributedExecutor::new();
    let mut state = executor.open(plan, &h.session);
    assert_eq!(state.strategy_kind(), StrategyKind::InsertSelectCoordinated);
    assert!(state.tuple_descriptor().fields().is_empty());
    assert!(state.next(&mut h.session).await.unwrap().is_none());

    let explain = state.explain();
    assert_eq!(explain.summary.as_deref(), Some("inserted 6 of 6 rows"));

    let inserts: Vec<String> = h
        .nodes
        .iter()
        .flat_map(|n| n.session(0).unwrap().inserts)
        .collect();
    assert!(!inserts.is_empty());
    assert!(inserts.iter().all(|i| i.starts_with("INSERT INTO dst_")));
    let joined = inserts.join(" ");
    for id in 1..=6 {
        assert!(joined.contains(&format!("({id}, 'row_{id}')")));
    }
}

#[tokio::test]
async fn test_remote_failure_aborts_scan() {
    let mut h = Harness::new(2);
    let queries = serve_shards(&h, &[&[1], &[2]]);
    h.nodes[1].fail_commands_containing("t_1");
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    h.session.begin().unwrap();
    let result = DistributedExecutor::new().collect(plan.clone(), &mut h.session).await;
    assert!(matches!(result, Err(DxdbError::RemoteExecution { .. })));

    let failed = h.session.pool().get_connection(h.nodes[1].addr()).await.unwrap();
    assert_eq!(failed.status(), TransactionStatus::Failed);

    let mut state = DistributedExecutor::new().open(plan, &h.session);
    assert!(state.next(&mut h.session).await.is_err());
    assert_eq!(state.phase(), ScanPhase::Exhausted);
    let explain = state.explain();
    assert!(explain.error.is_some());
    assert!(explain
        .fragments
        .iter()
        .any(|f| matches!(f.state, FragmentState::Failed(_))));
}

#[tokio::test]
async fn test_interrupt_cancels_running_scan() {
    let mut h = Harness::new(2);
    let queries = serve_shards(&h, &[&[1], &[2]]);
    h.nodes[1].hang_responses(true);
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    h.session.begin().unwrap();
    let interrupt = h.session.interrupt_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        interrupt.cancel();
    });

    let mut state = DistributedExecutor::new().open(plan, &h.session);
    let mut result = state.next(&mut h.session).await;
    while let Ok(Some(_)) = result {
        result = state.next(&mut h.session).await;
    }
    assert!(matches!(result, Err(DxdbError::Cancelled)));

    let hung = h.session.pool().get_connection(h.nodes[1].addr()).await.unwrap();
    assert!(hung.is_failed());
    assert!(state
        .explain()
        .fragments
        .iter()
        .any(|f| f.state == FragmentState::Abandoned));
}

#[tokio::test]
async fn test_scan_interrupt_does_not_cancel_next_command() {
    let mut h = Harness::new(2);
    let queries = serve_shards(&h, &[&[1], &[2]]);
    h.nodes[1].hang_responses(true);
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    h.session.begin().unwrap();
    let interrupt = h.session.interrupt_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        interrupt.cancel();
    });

    let executor = DistributedExecutor::new();
    let mut state = executor.open(plan, &h.session);
    let mut result = state.next(&mut h.session).await;
    while let Ok(Some(_)) = result {
        result = state.next(&mut h.session).await;
    }
    assert!(matches!(result, Err(DxdbError::Cancelled)));
    executor.close(&mut state, &mut h.session).await;
    assert!(!h.session.interrupt_handle().is_cancelled());

    let healthy = h.session.pool().get_connection(h.nodes[0].addr()).await.unwrap();
    let report = h
        .session
        .process_variable_set("SET y = 1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.delivered, vec![healthy.id()]);
    assert_eq!(report.skipped, 1);
    assert_eq!(healthy.status(), TransactionStatus::Active);
    assert_eq!(
        h.nodes[0].last_session_variables().get("y").map(String::as_str),
        Some("1")
    );

    let txn = h.session.transaction().unwrap();
    assert!(!txn.is_doomed());
    assert_eq!(txn.replay_commands().to_vec(), vec!["SET y = 1;".to_string()]);
    assert!(matches!(
        h.session.finish_transaction(),
        Some(TransactionOutcome::Degraded { .. })
    ));
}

#[tokio::test]
async fn test_close_without_interrupts_drains_slow_fragments() {
    let config = CoordinatorConfig {
        interruptible_waits: false,
        ..Default::default()
    };
    let mut h = Harness::with_config(2, config);
    let queries = serve_shards(&h, &[&[1], &[2]]);
    h.nodes[0].set_latency(Duration::from_millis(50));
    h.nodes[1].fail_commands_containing("t_1");
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    h.session.begin().unwrap();
    let result = DistributedExecutor::new().collect(plan, &mut h.session).await;
    assert!(matches!(result, Err(DxdbError::RemoteExecution { .. })));

    // The slow fragment was waited out rather than abandoned mid-flight.
    let slow = h.session.pool().get_connection(h.nodes[0].addr()).await.unwrap();
    assert_eq!(slow.status(), TransactionStatus::Active);
    let report = h
        .session
        .process_variable_set("SET z = 3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.delivered, vec![slow.id()]);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_explain_renders_fragment_lines() {
    let mut h = Harness::new(2);
    let queries = serve_shards(&h, &[&[1], &[2]]);
    let plan = Arc::new(h.planner().multi_shard(&queries, schema()).unwrap());

    let executor = DistributedExecutor::new();
    let mut state = executor.open(plan, &h.session);
    let before = executor.explain(&state).to_string();
    assert!(before.contains("Custom Scan (Distributed Streaming)"));
    assert!(before.contains("Phase: initialized"));
    assert!(before.contains("pending"));

    while executor.next(&mut state, &mut h.session).await.unwrap().is_some() {}
    let after = executor.explain(&state).to_string();
    assert!(after.contains("Task Count: 2"));
    assert!(after.contains("completed (1 rows)"));
    assert!(after.contains(&queries[1]));
}

#[tokio::test]
async fn test_relaxed_router_runs_every_fragment() {
    let config = CoordinatorConfig {
        strict_router: false,
        ..Default::default()
    };
    let mut h = Harness::with_config(2, config);
    let queries = serve_shards(&h, &[&[1], &[2]]);
    let fragments = h
        .addrs()
        .into_iter()
        .zip(&queries)
        .enumerate()
        .map(|(i, (node, query))| Fragment::new(i as u32, node, query.clone()))
        .collect();
    let plan = Arc::new(DistributedPlan::new(PlanCategory::SingleShard, fragments, schema()));

    let rows = DistributedExecutor::new()
        .collect(plan, &mut h.session)
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec![1, 2]);
}
