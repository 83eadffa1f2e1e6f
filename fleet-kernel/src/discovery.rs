//! Discovery watcher: turns periodic directory listings into add/remove events.
//!
//! Each cycle reads the direct children of the watched directory, parses every
//! value as `host:port`, and diffs the resulting set against the previous one.
//! Additions are always emitted before removals of the same cycle, so a host
//! replaced by another never leaves a window with zero pollers.
//!
//! A failed child read is reported and skipped. A failed read of the watched
//! directory itself is reported and ends the watcher.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::directory::Directory;
use crate::error::DiscoveryError;
use crate::events::DiscoveryEvent;
use crate::models::{DiscoverySet, HostAddress};

/// Set difference between two consecutive discovery cycles, each side sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDiff {
    pub added: Vec<HostAddress>,
    pub removed: Vec<HostAddress>,
}

impl HostDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// `added = new - old`, `removed = old - new`.
pub fn diff_hosts(old: &DiscoverySet, new: &DiscoverySet) -> HostDiff {
    HostDiff {
        added: new.difference(old).cloned().collect(),
        removed: old.difference(new).cloned().collect(),
    }
}

/// What one discovery cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub added: usize,
    pub removed: usize,
    pub key_errors: usize,
    pub malformed: usize,
    /// The event consumer went away mid-cycle.
    pub closed: bool,
}

struct ConsumerGone;

enum ReadFailure {
    Fatal(DiscoveryError),
    Closed,
}

impl From<ConsumerGone> for ReadFailure {
    fn from(_: ConsumerGone) -> Self {
        ReadFailure::Closed
    }
}

pub struct DiscoveryWatcher {
    directory: Arc<dyn Directory>,
    path: String,
    period: Duration,
    hosts: DiscoverySet,
    bootstrapped: bool,
    events: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoveryWatcher {
    pub fn new(
        directory: Arc<dyn Directory>,
        path: impl Into<String>,
        period: Duration,
        events: mpsc::Sender<DiscoveryEvent>,
    ) -> Self {
        let path = path.into();
        info!("created discovery watcher on {} (period {:?})", path, period);
        Self {
            directory,
            path,
            period,
            hosts: DiscoverySet::new(),
            bootstrapped: false,
            events,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hosts known after the last completed cycle.
    pub fn hosts(&self) -> &DiscoverySet {
        &self.hosts
    }

    /// Poll until cancelled or until the watched directory becomes unreadable.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("discovery watcher for {} running", self.path);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.poll_once() => match res {
                    Ok(report) => report,
                    Err(e) => {
                        error!("discovery watcher for {} terminating: {}", self.path, e);
                        return Err(e);
                    }
                },
            };
            if report.closed {
                info!("event consumer for {} closed, watcher exiting", self.path);
                return Ok(());
            }
        }

        info!("discovery watcher for {} cancelled", self.path);
        Ok(())
    }

    /// Run one discovery cycle: read, diff, emit.
    pub async fn poll_once(&mut self) -> Result<CycleReport, DiscoveryError> {
        let mut report = CycleReport::default();
        let new_set = match self.read_hosts(&mut report).await {
            Ok(set) => set,
            Err(ReadFailure::Fatal(fatal)) => return Err(fatal),
            Err(ReadFailure::Closed) => {
                report.closed = true;
                return Ok(report);
            }
        };

        if !self.bootstrapped {
            for host in &new_set {
                info!("found initial host {} under {}", host, self.path);
            }
            self.bootstrapped = true;
        }

        let diff = diff_hosts(&self.hosts, &new_set);
        if diff.is_empty() {
            debug!("{}: {} hosts, no change", self.path, new_set.len());
            return Ok(report);
        }

        for host in diff.added {
            info!("ADD {} ({})", host, self.path);
            if self.emit(DiscoveryEvent::Added(host.clone())).await.is_err() {
                report.closed = true;
                return Ok(report);
            }
            self.hosts.insert(host);
            report.added += 1;
        }
        for host in diff.removed {
            info!("REMOVE {} ({})", host, self.path);
            if self.emit(DiscoveryEvent::Removed(host.clone())).await.is_err() {
                report.closed = true;
                return Ok(report);
            }
            self.hosts.remove(&host);
            report.removed += 1;
        }
        Ok(report)
    }

    /// Build the new set. A fatal directory failure is reported before it is
    /// returned.
    async fn read_hosts(&self, report: &mut CycleReport) -> Result<DiscoverySet, ReadFailure> {
        let listing = match self.directory.list(&self.path).await {
            Ok(listing) => listing,
            Err(source) => {
                let reason = source.to_string();
                // fatal even when nobody is left to hear about it
                let _ = self
                    .emit(DiscoveryEvent::DirectoryUnreachable {
                        path: self.path.clone(),
                        reason,
                    })
                    .await;
                return Err(ReadFailure::Fatal(DiscoveryError::Unreachable {
                    path: self.path.clone(),
                    source,
                }));
            }
        };

        if !listing.is_dir {
            warn!("the watched key {} is not a directory", self.path);
            let _ = self
                .emit(DiscoveryEvent::NotADirectory {
                    path: self.path.clone(),
                })
                .await;
            return Err(ReadFailure::Fatal(DiscoveryError::NotADirectory(self.path.clone())));
        }

        let mut set = DiscoverySet::new();
        for child in listing.children {
            if child.is_dir {
                // no recursion into sub-directories
                continue;
            }
            let value = match self.directory.get(&child.key).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("error reading key {}: {}", child.key, e);
                    report.key_errors += 1;
                    self.emit(DiscoveryEvent::KeyReadError {
                        key: child.key,
                        reason: e.to_string(),
                    })
                    .await?;
                    continue;
                }
            };
            match value.parse::<HostAddress>() {
                Ok(host) => {
                    set.insert(host);
                }
                Err(e) => {
                    warn!("key {} holds an invalid host: {}", child.key, e);
                    report.malformed += 1;
                    self.emit(DiscoveryEvent::MalformedAddress {
                        key: child.key,
                        value,
                    })
                    .await?;
                }
            }
        }
        Ok(set)
    }

    /// Blocks while the channel is full: consumers apply backpressure here.
    async fn emit(&self, event: DiscoveryEvent) -> Result<(), ConsumerGone> {
        self.events.send(event).await.map_err(|_| ConsumerGone)
    }
}
