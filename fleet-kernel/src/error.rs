//! Error taxonomy of the fleet kernel.
//!
//! One enum per concern so every failure class keeps its own policy:
//! fetch errors are retried, stats errors stop a poller, directory errors stop
//! a watcher, sink errors are logged and dropped.

use std::time::Duration;

/// A `host:port` string that could not be turned into a [`crate::models::HostAddress`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("expected <host>:<port>, got {0:?}")]
    Format(String),
    #[error("empty host in {0:?}")]
    EmptyHost(String),
    #[error("invalid port {port:?} in {input:?}")]
    Port { input: String, port: String },
}

/// Transient network failure while reading one stats document.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },
    #[error("read from {target} failed: {source}")]
    Read {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("read from {target} timed out after {timeout:?}")]
    ReadTimeout { target: String, timeout: Duration },
    #[error("response from {target} exceeds {limit} bytes")]
    TooLarge { target: String, limit: usize },
}

/// Stats payload that does not decode: the remote is incompatible, not flaky.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("empty stats response")]
    Empty,
    #[error("invalid stats document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a directory backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("directory backend unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected directory response: {0}")]
    Protocol(String),
}

/// Fatal condition ending one discovery watcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("cannot read watched directory {path}: {source}")]
    Unreachable {
        path: String,
        #[source]
        source: DirectoryError,
    },
    #[error("watched key {0} is not a directory")]
    NotADirectory(String),
}

/// Push to the metrics backend failed.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("metrics backend rejected {metric}: {reason}")]
    Rejected { metric: String, reason: String },
    #[error("push of {metric} timed out after {timeout:?}")]
    Timeout { metric: String, timeout: Duration },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration file problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}
