//! In-process remote nodes.
//!
//! A `SimulatedNode` behaves like a small SQL server: it keeps session
//! variables per session, answers `SHOW`, records inserts and serves canned
//! query results. Faults (refused sends, failing commands, latency, hung
//! responses) can be switched on per node.

use crate::session::{Connector, RemoteResult, RemoteSession};
use arrow_array::{RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use dashmap::DashMap;
use dxdb_common::{DxdbError, NodeAddr, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Everything one remote session has seen
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    /// Raw commands in arrival order
    pub commands: Vec<String>,
    /// Session variables set so far
    pub variables: BTreeMap<String, String>,
    /// INSERT statements accepted by this session
    pub inserts: Vec<String>,
}

#[derive(Default)]
struct NodeState {
    query_results: HashMap<String, (SchemaRef, Vec<RecordBatch>)>,
    failing_patterns: Vec<String>,
    refuse_sends: bool,
    hang_responses: bool,
    unreachable: bool,
    latency: Duration,
    sessions: Vec<SessionRecord>,
}

impl NodeState {
    fn execute(&mut self, session: usize, command: &str) -> RemoteResult {
        self.sessions[session].commands.push(command.to_string());

        if let Some(pattern) = self
            .failing_patterns
            .iter()
            .find(|p| command.contains(p.as_str()))
        {
            return RemoteResult::error("XX000", format!("injected failure matching \"{pattern}\""));
        }

        let mut last = RemoteResult::Command {
            tag: "EMPTY".to_string(),
        };
        for statement in command.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            last = self.execute_statement(session, statement);
            if !last.is_success() {
                break;
            }
        }
        last
    }

    fn execute_statement(&mut self, session: usize, statement: &str) -> RemoteResult {
        let upper = statement.to_ascii_uppercase();
        let record = &mut self.sessions[session];

        if upper.starts_with("SET ") {
            return match parse_set(statement) {
                Some((name, value)) => {
                    record.variables.insert(name, value);
                    RemoteResult::Command {
                        tag: "SET".to_string(),
                    }
                }
                None => RemoteResult::error("42601", format!("syntax error in \"{statement}\"")),
            };
        }

        if upper.starts_with("SHOW ") {
            let name = statement[5..].trim().to_ascii_lowercase();
            return match record.variables.get(&name) {
                Some(value) => show_result(&name, value),
                None => RemoteResult::error(
                    "42704",
                    format!("unrecognized configuration parameter \"{name}\""),
                ),
            };
        }

        if upper.starts_with("INSERT ") {
            let rows = count_value_rows(statement);
            record.inserts.push(statement.to_string());
            return RemoteResult::Command {
                tag: format!("INSERT 0 {rows}"),
            };
        }

        if let Some((schema, batches)) = self.query_results.get(statement) {
            return RemoteResult::Tuples {
                schema: schema.clone(),
                batches: batches.clone(),
            };
        }

        if upper.starts_with("SELECT ") {
            return RemoteResult::error("42P01", format!("no result registered for \"{statement}\""));
        }

        RemoteResult::Command {
            tag: upper
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// `SET [SESSION|LOCAL] name {=|TO} value`
fn parse_set(statement: &str) -> Option<(String, String)> {
    let mut rest = statement[3..].trim_start();
    for scope in ["SESSION ", "LOCAL "] {
        if rest.to_ascii_uppercase().starts_with(scope) {
            rest = rest[scope.len()..].trim_start();
        }
    }

    let (name, value) = match rest.split_once('=') {
        Some(pair) => pair,
        None => {
            let upper = rest.to_ascii_uppercase();
            let at = upper.find(" TO ")?;
            (&rest[..at], &rest[at + 4..])
        }
    };

    let name = name.trim().to_ascii_lowercase();
    let value = value.trim().trim_matches('\'').to_string();
    if name.is_empty() || name.contains(char::is_whitespace) || value.is_empty() {
        return None;
    }
    Some((name, value))
}

/// Number of top-level row constructors after `VALUES`.
fn count_value_rows(statement: &str) -> usize {
    let upper = statement.to_ascii_uppercase();
    let Some(at) = upper.find("VALUES") else {
        return 0;
    };

    let mut rows = 0;
    let mut depth = 0usize;
    let mut in_string = false;
    for ch in statement[at + 6..].chars() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => {
                if depth == 0 {
                    rows += 1;
                }
                depth += 1;
            }
            ')' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    rows
}

fn show_result(name: &str, value: &str) -> RemoteResult {
    let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Utf8, false)]));
    match RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(StringArray::from(vec![value.to_string()]))],
    ) {
        Ok(batch) => RemoteResult::Tuples {
            schema,
            batches: vec![batch],
        },
        Err(e) => RemoteResult::error("XX000", e.to_string()),
    }
}

/// One simulated remote node
pub struct SimulatedNode {
    addr: NodeAddr,
    state: Mutex<NodeState>,
}

impl SimulatedNode {
    pub fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    /// Serve `batches` for the exact query text `query` (without terminator).
    pub fn add_query_result(&self, query: impl Into<String>, batches: Vec<RecordBatch>) {
        let schema = match batches.first() {
            Some(b) => b.schema(),
            None => Arc::new(Schema::empty()),
        };
        self.state
            .lock()
            .query_results
            .insert(query.into(), (schema, batches));
    }

    /// Any command containing `pattern` is answered with an error.
    pub fn fail_commands_containing(&self, pattern: impl Into<String>) {
        self.state.lock().failing_patterns.push(pattern.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing_patterns.clear();
    }

    pub fn refuse_sends(&self, refuse: bool) {
        self.state.lock().refuse_sends = refuse;
    }

    /// Responses to commands sent from now on never become readable.
    pub fn hang_responses(&self, hang: bool) {
        self.state.lock().hang_responses = hang;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn session(&self, index: usize) -> Option<SessionRecord> {
        self.state.lock().sessions.get(index).cloned()
    }

    /// Commands received by the most recently opened session
    pub fn last_session_commands(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .last()
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    /// Variables of the most recently opened session
    pub fn last_session_variables(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .sessions
            .last()
            .map(|s| s.variables.clone())
            .unwrap_or_default()
    }

    fn open_session(self: &Arc<Self>) -> Result<SimulatedSession> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(DxdbError::Network(format!(
                "could not connect to {}",
                self.addr
            )));
        }
        state.sessions.push(SessionRecord::default());
        Ok(SimulatedSession {
            node: self.clone(),
            index: state.sessions.len() - 1,
            pending: None,
        })
    }
}

struct PendingResponse {
    ready_at: Instant,
    hang: bool,
    result: RemoteResult,
}

/// Session handed out by [`SimulatedCluster`]
pub struct SimulatedSession {
    node: Arc<SimulatedNode>,
    index: usize,
    pending: Option<PendingResponse>,
}

#[async_trait]
impl RemoteSession for SimulatedSession {
    fn send_command(&mut self, command: &str) -> bool {
        // One command in flight per session.
        if self.pending.is_some() {
            return false;
        }

        let mut state = self.node.state.lock();
        if state.refuse_sends {
            return false;
        }
        let result = state.execute(self.index, command);
        self.pending = Some(PendingResponse {
            ready_at: Instant::now() + state.latency,
            hang: state.hang_responses,
            result,
        });
        true
    }

    async fn wait_readable(&mut self) {
        let (ready_at, hang) = match &self.pending {
            Some(p) => (p.ready_at, p.hang),
            None => return,
        };
        if hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep_until(ready_at).await;
    }

    fn take_result(&mut self) -> Result<RemoteResult> {
        match self.pending.take() {
            Some(p) if p.hang || p.ready_at > Instant::now() => {
                self.pending = Some(p);
                Err(DxdbError::Network(format!(
                    "response from {} not yet available",
                    self.node.addr
                )))
            }
            Some(p) => Ok(p.result),
            None => Err(DxdbError::Network(format!(
                "no command in flight on {}",
                self.node.addr
            ))),
        }
    }

    fn forget_results(&mut self) {
        self.pending = None;
    }
}

/// A set of simulated nodes reachable by address
#[derive(Default)]
pub struct SimulatedCluster {
    nodes: DashMap<NodeAddr, Arc<SimulatedNode>>,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, addr: NodeAddr) -> Arc<SimulatedNode> {
        let node = Arc::new(SimulatedNode::new(addr.clone()));
        self.nodes.insert(addr, node.clone());
        node
    }

    pub fn node(&self, addr: &NodeAddr) -> Option<Arc<SimulatedNode>> {
        self.nodes.get(addr).map(|n| n.value().clone())
    }
}

#[async_trait]
impl Connector for SimulatedCluster {
    async fn connect(&self, node: &NodeAddr) -> Result<Box<dyn RemoteSession>> {
        let target = self
            .node(node)
            .ok_or_else(|| DxdbError::Network(format!("unknown node {node}")))?;
        Ok(Box::new(target.open_session()?))
    }
}
