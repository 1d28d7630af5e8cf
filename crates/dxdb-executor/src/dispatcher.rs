//! Sends plan fragments to remote nodes and collects their results.
//!
//! Fragments are grouped into one lane per node. A lane owns the pooled
//! connection for that node and keeps at most one fragment in flight on it;
//! the next queued fragment is submitted as soon as the previous result has
//! been retrieved.

use crate::explain::{FragmentState, FragmentStatus};
use dxdb_common::{DxdbError, FragmentId, NodeAddr, Result};
use dxdb_coordinator::CoordinatorSession;
use dxdb_network::{wait_for_all, wait_for_any, RemoteConnection, RemoteResult};
use dxdb_planner::Fragment;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// How the dispatcher obtains connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Enlist in the session's distributed transaction (with session replay)
    Transactional,
    /// Use the pooled connection as is
    Direct,
}

struct Lane {
    node: NodeAddr,
    connection: Option<Arc<RemoteConnection>>,
    queue: VecDeque<Fragment>,
    in_flight: Option<Fragment>,
}

impl Lane {
    fn new(node: NodeAddr) -> Self {
        Self {
            node,
            connection: None,
            queue: VecDeque::new(),
            in_flight: None,
        }
    }
}

pub struct FragmentDispatcher {
    mode: DispatchMode,
    lanes: Vec<Lane>,
    statuses: BTreeMap<FragmentId, FragmentStatus>,
    fetches: usize,
}

async fn acquire(
    mode: DispatchMode,
    session: &mut CoordinatorSession,
    node: &NodeAddr,
) -> Result<Arc<RemoteConnection>> {
    match mode {
        DispatchMode::Transactional => session.enlist_connection(node).await,
        DispatchMode::Direct => session.direct_connection(node).await,
    }
}

impl FragmentDispatcher {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            lanes: Vec::new(),
            statuses: BTreeMap::new(),
            fetches: 0,
        }
    }

    /// Queue fragments for dispatch; nothing is sent until [`start`](Self::start).
    pub fn track(&mut self, fragments: impl IntoIterator<Item = Fragment>) {
        for fragment in fragments {
            self.statuses.insert(
                fragment.id,
                FragmentStatus {
                    fragment: fragment.id,
                    node: fragment.node.clone(),
                    query: fragment.query.clone(),
                    state: FragmentState::Pending,
                },
            );

            let index = match self.lanes.iter().position(|l| l.node == fragment.node) {
                Some(index) => index,
                None => {
                    self.lanes.push(Lane::new(fragment.node.clone()));
                    self.lanes.len() - 1
                }
            };
            self.lanes[index].queue.push_back(fragment);
        }
    }

    /// Submit the head fragment of every idle lane.
    pub async fn start(&mut self, session: &mut CoordinatorSession) -> Result<()> {
        for index in 0..self.lanes.len() {
            self.dispatch(index, session).await?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, index: usize, session: &mut CoordinatorSession) -> Result<()> {
        let lane = &mut self.lanes[index];
        if lane.in_flight.is_some() {
            return Ok(());
        }
        let Some(fragment) = lane.queue.pop_front() else {
            return Ok(());
        };
        let cached = lane.connection.clone();
        let node = lane.node.clone();

        let connection = match cached {
            Some(connection) => connection,
            None => match acquire(self.mode, session, &node).await {
                Ok(connection) => connection,
                Err(e) => {
                    self.set_state(fragment.id, FragmentState::Failed(e.to_string()));
                    return Err(e);
                }
            },
        };

        if self.mode == DispatchMode::Transactional && connection.is_failed() {
            let e = DxdbError::RemoteExecution {
                connection: connection.id(),
                message: connection
                    .last_error()
                    .unwrap_or_else(|| format!("connection to {node} has failed")),
            };
            self.set_state(fragment.id, FragmentState::Failed(e.to_string()));
            return Err(e);
        }

        if !connection.submit(&fragment.query).await {
            let e = DxdbError::Submission {
                connection: connection.id(),
                message: format!("could not send {} to {}", fragment.id, node),
            };
            if self.mode == DispatchMode::Transactional {
                connection.mark_failed(e.to_string());
            }
            self.set_state(fragment.id, FragmentState::Failed(e.to_string()));
            return Err(e);
        }

        tracing::debug!("Dispatched {} to {} on {}", fragment.id, node, connection.id());
        self.fetches += 1;
        self.set_state(fragment.id, FragmentState::Running);
        let lane = &mut self.lanes[index];
        lane.connection = Some(connection);
        lane.in_flight = Some(fragment);
        Ok(())
    }

    /// Wait for the next fragment to report. `None` once nothing is left.
    ///
    /// A remote error fails the fragment and is returned to the caller.
    pub async fn next_result(
        &mut self,
        session: &mut CoordinatorSession,
    ) -> Result<Option<(Fragment, RemoteResult)>> {
        let busy: Vec<(usize, Arc<RemoteConnection>)> = self
            .lanes
            .iter()
            .enumerate()
            .filter(|(_, lane)| lane.in_flight.is_some())
            .filter_map(|(index, lane)| lane.connection.clone().map(|c| (index, c)))
            .collect();
        if busy.is_empty() {
            return Ok(None);
        }

        let connections: Vec<Arc<RemoteConnection>> = busy.iter().map(|(_, c)| c.clone()).collect();
        let interrupt = session.wait_interrupt();
        let ready = wait_for_any(&connections, interrupt.as_ref()).await?;
        let (index, connection) = busy[ready].clone();

        let result = connection.retrieve_result().await;
        connection.forget_results().await;
        let fragment = self.lanes[index]
            .in_flight
            .take()
            .ok_or_else(|| DxdbError::Internal(format!("no fragment in flight on {}", connection.node())))?;

        let result = match result {
            Ok(result) if result.is_success() => result,
            Ok(result) => {
                let message = result
                    .error_message()
                    .unwrap_or_else(|| "remote command failed".to_string());
                return Err(self.fail(&fragment, &connection, message));
            }
            Err(e) => return Err(self.fail(&fragment, &connection, e.to_string())),
        };

        self.set_state(
            fragment.id,
            FragmentState::Completed {
                rows: result.row_count(),
            },
        );
        self.dispatch(index, session).await?;
        Ok(Some((fragment, result)))
    }

    fn fail(&mut self, fragment: &Fragment, connection: &RemoteConnection, message: String) -> DxdbError {
        tracing::warn!(
            "{} failed on {} ({}): {}",
            fragment.id,
            connection.node(),
            connection.id(),
            message
        );
        if self.mode == DispatchMode::Transactional {
            connection.mark_failed(message.clone());
        }
        self.set_state(fragment.id, FragmentState::Failed(message.clone()));
        DxdbError::RemoteExecution {
            connection: connection.id(),
            message: format!("{} on {}: {}", fragment.id, connection.node(), message),
        }
    }

    /// Stop dispatching and settle the connections that still have a
    /// fragment running. Unfinished fragments are marked abandoned.
    pub async fn abandon(&mut self, session: &CoordinatorSession) {
        let in_flight: Vec<Arc<RemoteConnection>> = self
            .lanes
            .iter()
            .filter(|lane| lane.in_flight.is_some())
            .filter_map(|lane| lane.connection.clone())
            .collect();

        if !in_flight.is_empty() {
            let interrupt = session.wait_interrupt();
            let interrupted = wait_for_all(&in_flight, interrupt.as_ref()).await.is_err();
            for connection in &in_flight {
                // A response that never arrived leaves the session out of step.
                if interrupted && connection.retrieve_result().await.is_err() {
                    if connection.mark_failed("interrupted while a fragment was running") {
                        tracing::warn!("{} ({}) interrupted mid-fragment", connection.id(), connection.node());
                    }
                    if self.mode == DispatchMode::Direct {
                        session.pool().remove_connection(connection.node());
                    }
                }
                connection.forget_results().await;
            }
        }

        let mut abandoned = Vec::new();
        for lane in &mut self.lanes {
            abandoned.extend(lane.in_flight.take().map(|f| f.id));
            abandoned.extend(lane.queue.drain(..).map(|f| f.id));
        }
        for id in abandoned {
            self.set_state(id, FragmentState::Abandoned);
        }
    }

    fn set_state(&mut self, id: FragmentId, state: FragmentState) {
        if let Some(status) = self.statuses.get_mut(&id) {
            status.state = state;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.lanes
            .iter()
            .all(|lane| lane.in_flight.is_none() && lane.queue.is_empty())
    }

    /// Number of fragment queries sent so far
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    pub fn statuses(&self) -> Vec<FragmentStatus> {
        self.statuses.values().cloned().collect()
    }
}
