//! Events crossing task boundaries.
//!
//! Discovery events flow watcher -> supervisor, poller events flow
//! poller -> supervisor. Both are plain tagged enums with typed payloads.

use serde::Serialize;
use std::fmt;

use crate::models::HostAddress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    Added(HostAddress),
    Removed(HostAddress),
    /// The watched directory could not be read. Terminal for that watcher.
    DirectoryUnreachable { path: String, reason: String },
    /// The watched key holds a value instead of children. Terminal.
    NotADirectory { path: String },
    /// One child could not be read; the rest of the cycle went on.
    KeyReadError { key: String, reason: String },
    /// One child holds something that is not `host:port`; skipped.
    MalformedAddress { key: String, value: String },
}

impl DiscoveryEvent {
    /// Whether the emitting watcher stopped after this event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DiscoveryEvent::DirectoryUnreachable { .. } | DiscoveryEvent::NotADirectory { .. }
        )
    }
}

impl fmt::Display for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEvent::Added(addr) => write!(f, "host added: {addr}"),
            DiscoveryEvent::Removed(addr) => write!(f, "host removed: {addr}"),
            DiscoveryEvent::DirectoryUnreachable { path, reason } => {
                write!(f, "directory {path} unreachable: {reason}")
            }
            DiscoveryEvent::NotADirectory { path } => write!(f, "{path} is not a directory"),
            DiscoveryEvent::KeyReadError { key, reason } => {
                write!(f, "unable to read key {key}: {reason}")
            }
            DiscoveryEvent::MalformedAddress { key, value } => {
                write!(f, "key {key} holds malformed host {value:?}")
            }
        }
    }
}

/// Terminal notification from one host poller.
///
/// `generation` identifies the poller instance the supervisor spawned, so an
/// event from a replaced poller cannot affect its successor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PollerEvent {
    Unreachable { address: HostAddress, generation: u64 },
    ParseFailure { address: HostAddress, generation: u64 },
    Stopped { address: HostAddress, generation: u64 },
}

impl PollerEvent {
    pub fn address(&self) -> &HostAddress {
        match self {
            PollerEvent::Unreachable { address, .. }
            | PollerEvent::ParseFailure { address, .. }
            | PollerEvent::Stopped { address, .. } => address,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            PollerEvent::Unreachable { generation, .. }
            | PollerEvent::ParseFailure { generation, .. }
            | PollerEvent::Stopped { generation, .. } => *generation,
        }
    }
}

impl fmt::Display for PollerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerEvent::Unreachable { address, .. } => write!(f, "{address} unreachable"),
            PollerEvent::ParseFailure { address, .. } => {
                write!(f, "{address} returned undecodable stats")
            }
            PollerEvent::Stopped { address, .. } => write!(f, "poller for {address} stopped"),
        }
    }
}
