use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

/// A validated `host:port` pair, as stored in the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Same host, different port (the stats socket lives on a fleet-wide port).
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
        }
    }
}

impl FromStr for HostAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut parts = trimmed.split(':');
        let (host, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), None) => (host, port),
            _ => return Err(AddressError::Format(s.to_string())),
        };
        if host.is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }
        let port = port.parse::<u16>().map_err(|_| AddressError::Port {
            input: s.to_string(),
            port: port.to_string(),
        })?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Hosts currently believed to exist under one watched directory.
pub type DiscoverySet = BTreeSet<HostAddress>;

/// Identity of a monitored uWSGI process (cwd + uid + pid + gid).
///
/// Deliberately independent of the network address: a process replaced behind
/// the same address is a different host for aggregation purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(String);

impl HostId {
    pub fn from_parts(cwd: &str, uid: i64, pid: i64, gid: i64) -> Self {
        Self(format!("{cwd}:{uid}:{pid}:{gid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Summary of one successful poll of one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub host_id: HostId,
    /// Discovered address the snapshot came from (logging only).
    pub source: Option<HostAddress>,
    pub total_workers: u64,
    pub idle_workers: u64,
    pub busy_workers: u64,
    pub exceptions_count: u64,
    pub busy_workers_percentage: f64,
    pub load: i64,
    pub observed_at: DateTime<Utc>,
}

/// Cluster-wide sums over every non-stale host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClusterTotals {
    pub total_workers: f64,
    pub idle_workers: f64,
    pub busy_workers: f64,
    /// Sum of per-host percentages, not busy/total over the cluster.
    pub busy_workers_percentage: f64,
    pub exceptions_count: f64,
    pub hosts: usize,
}

impl ClusterTotals {
    pub const TOTAL_WORKERS: &'static str = "total-workers";
    pub const IDLE_WORKERS: &'static str = "idle-workers";
    pub const BUSY_WORKERS: &'static str = "busy-workers";
    pub const EXCEPTIONS_COUNT: &'static str = "exceptions-count";
    pub const BUSY_WORKERS_PERCENTAGE: &'static str = "busy-workers-percentage";

    /// Named values in the order they are pushed.
    pub fn named(&self) -> [(&'static str, f64); 5] {
        [
            (Self::TOTAL_WORKERS, self.total_workers),
            (Self::IDLE_WORKERS, self.idle_workers),
            (Self::BUSY_WORKERS, self.busy_workers),
            (Self::EXCEPTIONS_COUNT, self.exceptions_count),
            (Self::BUSY_WORKERS_PERCENTAGE, self.busy_workers_percentage),
        ]
    }
}

/// One sample handed to a metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDatum {
    pub metric_name: String,
    pub namespace: String,
    pub dimension_name: String,
    pub dimension_value: String,
    pub unit: String,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_address() {
        let addr: HostAddress = "10.0.0.7:3031".parse().unwrap();
        assert_eq!(addr, HostAddress::new("10.0.0.7", 3031));
        assert_eq!(addr.to_string(), "10.0.0.7:3031");

        let trimmed: HostAddress = " web-1:80\n".parse().unwrap();
        assert_eq!(trimmed, HostAddress::new("web-1", 80));
    }

    #[test]
    fn test_reject_malformed_addresses() {
        assert!(matches!("web-1".parse::<HostAddress>(), Err(AddressError::Format(_))));
        assert!(matches!("a:1:2".parse::<HostAddress>(), Err(AddressError::Format(_))));
        assert!(matches!(":80".parse::<HostAddress>(), Err(AddressError::EmptyHost(_))));
        assert!(matches!("web:http".parse::<HostAddress>(), Err(AddressError::Port { .. })));
        assert!(matches!("web:70000".parse::<HostAddress>(), Err(AddressError::Port { .. })));
    }

    #[test]
    fn test_with_port_keeps_host() {
        let addr = HostAddress::new("web-1", 3031);
        assert_eq!(addr.with_port(12321), HostAddress::new("web-1", 12321));
    }

    #[test]
    fn test_host_id_composition() {
        let id = HostId::from_parts("/srv/app", 33, 1200, 33);
        assert_eq!(id.as_str(), "/srv/app:33:1200:33");
        assert_ne!(id, HostId::from_parts("/srv/app", 33, 1201, 33));
    }
}
