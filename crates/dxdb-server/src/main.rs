//! DXDB coordinator binary
//!
//! Runs one scripted distributed transaction against an in-process cluster:
//! a connection joins early, the `--set` commands are broadcast, then a
//! multi-shard scan enlists the remaining nodes (which replay the session
//! commands first).

use arrow_array::{Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use clap::Parser;
use dxdb_common::{CoordinatorConfig, NodeAddr, RemoteErrorPolicy};
use dxdb_coordinator::CoordinatorSession;
use dxdb_executor::DistributedExecutor;
use dxdb_network::SimulatedCluster;
use dxdb_planner::FragmentPlanner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 5432;

/// DXDB CLI
#[derive(Parser, Debug)]
#[command(name = "dxdb")]
#[command(version = "0.1.0")]
#[command(about = "Distributed transaction coordinator")]
struct Args {
    /// Config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remote nodes (host[:port]), comma separated
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,

    /// What a broadcast does when a remote connection fails
    #[arg(long, value_enum)]
    error_policy: Option<RemoteErrorPolicy>,

    /// Session command to broadcast inside the transaction (repeatable)
    #[arg(long = "set")]
    set: Vec<String>,
}

fn load_config(args: &Args) -> anyhow::Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::load_from_file(path)?,
        None => CoordinatorConfig::default(),
    };
    if !args.nodes.is_empty() {
        config.nodes = args
            .nodes
            .iter()
            .map(|n| NodeAddr::parse(n, DEFAULT_PORT))
            .collect();
    }
    if config.nodes.is_empty() {
        config.nodes = (0..3)
            .map(|i| NodeAddr::new(format!("worker{i}"), DEFAULT_PORT))
            .collect();
    }
    if let Some(policy) = args.error_policy {
        config.remote_error_policy = policy;
    }
    Ok(config)
}

fn events_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("shard", DataType::Int64, false),
        Field::new("setting", DataType::Utf8, true),
    ]))
}

fn shard_batch(shard: usize) -> anyhow::Result<RecordBatch> {
    Ok(RecordBatch::try_new(
        events_schema(),
        vec![
            Arc::new(Int64Array::from(vec![shard as i64])),
            Arc::new(StringArray::from(vec![Some(format!("events_{shard}"))])),
        ],
    )?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_new(&config.log_filter).or_else(|_| EnvFilter::try_from_default_env())?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(
        "Starting dxdb with {} nodes, error policy {:?}",
        config.nodes.len(),
        config.remote_error_policy
    );

    let cluster = Arc::new(SimulatedCluster::new());
    let queries: Vec<String> = (0..config.nodes.len())
        .map(|i| format!("SELECT shard, setting FROM events_{i}"))
        .collect();
    for (i, node) in config.nodes.iter().enumerate() {
        cluster
            .add_node(node.clone())
            .add_query_result(queries[i].clone(), vec![shard_batch(i)?]);
    }

    let commands = if args.set.is_empty() {
        vec![
            "SET search_path = app".to_string(),
            "SET statement_timeout = 5000".to_string(),
        ]
    } else {
        args.set.clone()
    };

    let planner = FragmentPlanner::new(config.nodes.clone());
    let plan = Arc::new(planner.multi_shard(&queries, events_schema())?);
    let first_node = config.nodes[0].clone();
    let mut session = CoordinatorSession::new(config, cluster);

    let txn = session.begin()?;
    println!("BEGIN {txn}");
    session.shard_connection(&first_node).await?;

    for command in &commands {
        match session.process_variable_set(command).await? {
            Some(report) => println!(
                "{}  delivered={} skipped={} failed={}",
                report.command,
                report.delivered.len(),
                report.skipped,
                report.failures.len()
            ),
            None => println!("{command}  (no transaction)"),
        }
    }

    let executor = DistributedExecutor::new();
    let mut state = executor.open(plan, &session);
    let mut rows = 0;
    while let Some(row) = executor.next(&mut state, &mut session).await? {
        println!("  {}", row.values()?.join(" | "));
        rows += 1;
    }
    println!("({rows} rows)");
    print!("{}", executor.explain(&state));
    executor.close(&mut state, &mut session).await;

    if let Some(txn) = session.transaction() {
        println!("Remote connections:");
        for diagnostic in txn.diagnostics() {
            println!("  {diagnostic}");
        }
        println!("Session replay log:");
        for command in txn.replay_commands() {
            println!("  {command}");
        }
    }

    if let Some(outcome) = session.finish_transaction() {
        println!("END {outcome:?}");
    }
    Ok(())
}
