//! uWSGI stats document and the counters derived from it.
//!
//! The stats server writes one JSON object and closes the socket. Only `cwd`,
//! `uid`, `gid`, `pid` and `workers` are required; everything else defaults so
//! that older and newer uWSGI releases decode the same way.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::StatsError;
use crate::models::{HostAddress, HostId, StatsSnapshot};

const STATUS_BUSY: &str = "busy";
const STATUS_IDLE: &str = "idle";

#[derive(Debug, Clone, Deserialize)]
pub struct UwsgiStats {
    pub cwd: String,
    pub uid: i64,
    pub gid: i64,
    pub pid: i64,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub load: i64,
    #[serde(default)]
    pub listen_queue: i64,
    #[serde(default)]
    pub listen_queue_errors: i64,
    #[serde(default)]
    pub signal_queue: i64,
    #[serde(default)]
    pub locks: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub sockets: Vec<Socket>,
    pub workers: Vec<Worker>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Socket {
    pub name: String,
    pub proto: String,
    pub queue: i64,
    pub shared: i64,
    pub can_offload: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Worker {
    pub id: i64,
    pub pid: i64,
    pub status: String,
    pub exceptions: u64,
    pub requests: u64,
    pub delta_requests: u64,
    pub harakiri_count: u64,
    pub signals: u64,
    pub signal_queue: i64,
    pub respawn_count: u64,
    pub tx: u64,
    pub rss: u64,
    pub vsz: u64,
    pub running_time: u64,
    pub last_spawn: i64,
    pub avg_rt: u64,
    pub apps: Vec<App>,
    pub cores: Vec<Core>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct App {
    pub id: i64,
    pub modifier1: i64,
    pub mountpoint: String,
    pub startup_time: i64,
    pub requests: u64,
    pub exceptions: u64,
    pub chdir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Core {
    pub id: i64,
    pub requests: u64,
    pub static_requests: u64,
    pub routed_requests: u64,
    pub offloaded_requests: u64,
    pub write_errors: u64,
    pub in_request: i64,
    pub vars: Vec<serde_json::Value>,
}

impl UwsgiStats {
    /// Decode a full stats response (everything read until EOF).
    pub fn from_slice(raw: &[u8]) -> Result<Self, StatsError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(StatsError::Empty);
        }
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn host_id(&self) -> HostId {
        HostId::from_parts(&self.cwd, self.uid, self.pid, self.gid)
    }

    pub fn total_workers(&self) -> u64 {
        self.workers.len() as u64
    }

    pub fn busy_workers(&self) -> u64 {
        self.count_status(STATUS_BUSY)
    }

    pub fn idle_workers(&self) -> u64 {
        self.count_status(STATUS_IDLE)
    }

    pub fn exceptions_count(&self) -> u64 {
        self.workers.iter().map(|w| w.exceptions).sum()
    }

    /// 100 * busy / total, or 0 for an empty pool.
    pub fn busy_workers_percentage(&self) -> f64 {
        let total = self.total_workers();
        if total == 0 {
            return 0.0;
        }
        100.0 * self.busy_workers() as f64 / total as f64
    }

    pub fn to_snapshot(
        &self,
        source: Option<HostAddress>,
        observed_at: DateTime<Utc>,
    ) -> StatsSnapshot {
        StatsSnapshot {
            host_id: self.host_id(),
            source,
            total_workers: self.total_workers(),
            idle_workers: self.idle_workers(),
            busy_workers: self.busy_workers(),
            exceptions_count: self.exceptions_count(),
            busy_workers_percentage: self.busy_workers_percentage(),
            load: self.load,
            observed_at,
        }
    }

    fn count_status(&self, status: &str) -> u64 {
        self.workers.iter().filter(|w| w.status == status).count() as u64
    }
}

/// Raw bytes to snapshot, stamped with the current time.
pub fn parse_snapshot(
    raw: &[u8],
    source: Option<HostAddress>,
) -> Result<StatsSnapshot, StatsError> {
    let stats = UwsgiStats::from_slice(raw)?;
    Ok(stats.to_snapshot(source, Utc::now()))
}
