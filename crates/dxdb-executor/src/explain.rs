//! Introspection of a running or finished distributed scan

use crate::registry::StrategyCapabilities;
use crate::scan_state::ScanPhase;
use dxdb_common::{FragmentId, NodeAddr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentState {
    Pending,
    Running,
    Completed { rows: usize },
    Failed(String),
    /// Closed before the fragment reported
    Abandoned,
}

impl std::fmt::Display for FragmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentState::Pending => write!(f, "pending"),
            FragmentState::Running => write!(f, "running"),
            FragmentState::Completed { rows } => write!(f, "completed ({rows} rows)"),
            FragmentState::Failed(message) => write!(f, "failed: {message}"),
            FragmentState::Abandoned => write!(f, "abandoned"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentStatus {
    pub fragment: FragmentId,
    pub node: NodeAddr,
    pub query: String,
    pub state: FragmentState,
}

/// EXPLAIN-style description of one scan
#[derive(Debug, Clone)]
pub struct ScanExplain {
    pub strategy: &'static str,
    pub category: String,
    pub phase: ScanPhase,
    pub capabilities: StrategyCapabilities,
    pub fragments: Vec<FragmentStatus>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl ScanExplain {
    pub fn fragment(&self, id: FragmentId) -> Option<&FragmentStatus> {
        self.fragments.iter().find(|f| f.fragment == id)
    }
}

impl std::fmt::Display for ScanExplain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Custom Scan (Distributed {})", self.strategy)?;
        writeln!(f, "  Plan Category: {}", self.category)?;
        writeln!(f, "  Phase: {}", self.phase)?;
        if let Some(summary) = &self.summary {
            writeln!(f, "  Result: {summary}")?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "  Error: {error}")?;
        }
        writeln!(f, "  Task Count: {}", self.fragments.len())?;
        for status in &self.fragments {
            writeln!(
                f,
                "  ->  Task {} on {}: {}",
                status.fragment, status.node, status.state
            )?;
            writeln!(f, "        {}", status.query)?;
        }
        Ok(())
    }
}
