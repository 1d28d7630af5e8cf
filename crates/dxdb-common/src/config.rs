//! DXDB Coordinator Configuration

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// What a broadcast does when individual connections fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteErrorPolicy {
    /// Mark the connection failed, log the error and keep going.
    #[default]
    Warn,
    /// Mark the connection failed and return the first error to the caller.
    Raise,
}

/// Network address for a node
#[derive(Debug, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`; a missing or invalid port falls back to `default_port`.
    pub fn parse(s: &str, default_port: u16) -> Self {
        match s.rsplit_once(':') {
            Some((host, port)) => Self::new(host, port.parse().unwrap_or(default_port)),
            None => Self::new(s, default_port),
        }
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How per-connection failures surface from broadcasts
    pub remote_error_policy: RemoteErrorPolicy,

    /// Whether barrier waits observe the session interrupt.
    ///
    /// When false, closing a scan waits for every fragment still in flight,
    /// so a node that never answers blocks the close indefinitely.
    pub interruptible_waits: bool,

    /// Reject router plans that do not have exactly one fragment
    pub strict_router: bool,

    /// Remote nodes known to this coordinator
    pub nodes: Vec<NodeAddr>,

    /// tracing-subscriber filter directive
    pub log_filter: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            remote_error_policy: RemoteErrorPolicy::Warn,
            interruptible_waits: true,
            strict_router: true,
            nodes: Vec::new(),
            log_filter: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::DxdbError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::DxdbError::Config(e.to_string()))
    }

    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), crate::DxdbError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn with_error_policy(mut self, policy: RemoteErrorPolicy) -> Self {
        self.remote_error_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dxdb.toml");

        let config = CoordinatorConfig {
            remote_error_policy: RemoteErrorPolicy::Raise,
            nodes: vec![NodeAddr::new("10.0.0.1", 5432), NodeAddr::new("10.0.0.2", 5433)],
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = CoordinatorConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.remote_error_policy, RemoteErrorPolicy::Raise);
        assert_eq!(loaded.nodes, config.nodes);
        assert!(loaded.interruptible_waits);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CoordinatorConfig = toml::from_str("remote_error_policy = \"raise\"").unwrap();
        assert_eq!(config.remote_error_policy, RemoteErrorPolicy::Raise);
        assert!(config.strict_router);
        assert!(config.nodes.is_empty());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_node_addr_parse() {
        assert_eq!(NodeAddr::parse("worker-1:6000", 5432), NodeAddr::new("worker-1", 6000));
        assert_eq!(NodeAddr::parse("worker-2", 5432), NodeAddr::new("worker-2", 5432));
        assert_eq!(NodeAddr::parse("worker-3:abc", 5432).port, 5432);
        assert_eq!(NodeAddr::new("h", 1).to_string(), "h:1");
    }
}
