/**
 * POLLER SUPERVISOR - lifecycle of the per-host pollers
 *
 * ROLE: starts one HostPoller per discovered address, stops it when the
 * address disappears, forgets it when it gives up on its own.
 *
 * INVARIANT: at most one live poller per HostAddress. Every poller gets its
 * own cancellation token (child of the supervisor's) and a generation number;
 * events carrying an old generation are ignored.
 */

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{DiscoveryEvent, PollerEvent};
use crate::fetcher::StatsFetcher;
use crate::models::{HostAddress, StatsSnapshot};
use crate::poller::{HostPoller, PollerSettings};

struct PollerHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Lifetime counters, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub started: u64,
    pub stopped: u64,
    pub unreachable: u64,
    pub parse_failures: u64,
    pub fatal_discovery_events: u64,
}

pub struct PollerSupervisor {
    settings: PollerSettings,
    stats_port: u16,
    fetcher: Arc<dyn StatsFetcher>,
    stats_tx: mpsc::Sender<StatsSnapshot>,
    events_tx: mpsc::Sender<PollerEvent>,
    events_rx: mpsc::Receiver<PollerEvent>,
    pollers: HashMap<HostAddress, PollerHandle>,
    next_generation: u64,
    stats: SupervisorStats,
    cancel: CancellationToken,
}

impl PollerSupervisor {
    pub fn new(
        settings: PollerSettings,
        stats_port: u16,
        fetcher: Arc<dyn StatsFetcher>,
        stats_tx: mpsc::Sender<StatsSnapshot>,
        channel_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(channel_capacity);
        Self {
            settings,
            stats_port,
            fetcher,
            stats_tx,
            events_tx,
            events_rx,
            pollers: HashMap::new(),
            next_generation: 1,
            stats: SupervisorStats::default(),
            cancel,
        }
    }

    /// Addresses with a registered poller, sorted.
    pub fn active(&self) -> Vec<HostAddress> {
        let mut hosts: Vec<_> = self.pollers.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    pub fn is_polling(&self, address: &HostAddress) -> bool {
        self.pollers.contains_key(address)
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Process discovery and poller events until cancelled, or until discovery
    /// is closed and no poller is left.
    pub async fn run(mut self, mut discovery: mpsc::Receiver<DiscoveryEvent>) -> SupervisorStats {
        let mut discovery_open = true;
        loop {
            if !discovery_open && self.pollers.is_empty() {
                info!("discovery closed and no pollers left, supervisor exiting");
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                evt = self.events_rx.recv() => {
                    // we hold a sender, so recv never yields None here
                    if let Some(evt) = evt {
                        self.handle_poller_event(evt);
                    }
                }
                evt = discovery.recv(), if discovery_open => match evt {
                    Some(evt) => self.handle_discovery(evt),
                    None => {
                        warn!("discovery channel closed, keeping {} pollers", self.pollers.len());
                        discovery_open = false;
                    }
                },
            }
        }
        self.shutdown().await;
        self.stats
    }

    pub fn handle_discovery(&mut self, evt: DiscoveryEvent) {
        match evt {
            DiscoveryEvent::Added(address) => self.start(address),
            DiscoveryEvent::Removed(address) => {
                info!("host removed {}", address);
                self.stop(&address);
            }
            DiscoveryEvent::KeyReadError { .. } | DiscoveryEvent::MalformedAddress { .. } => {
                warn!("discovery: {}", evt);
            }
            DiscoveryEvent::DirectoryUnreachable { .. } | DiscoveryEvent::NotADirectory { .. } => {
                self.stats.fatal_discovery_events += 1;
                error!("discovery watcher terminated: {}", evt);
            }
        }
    }

    pub fn handle_poller_event(&mut self, evt: PollerEvent) {
        let current = self.pollers.get(evt.address()).map(|h| h.generation);
        if current != Some(evt.generation()) {
            debug!("ignoring event from replaced poller #{}: {}", evt.generation(), evt);
            return;
        }
        match &evt {
            PollerEvent::Unreachable { address, .. } => {
                self.stats.unreachable += 1;
                warn!("received event from poller: {}", evt);
                self.forget(address);
            }
            PollerEvent::ParseFailure { address, .. } => {
                self.stats.parse_failures += 1;
                warn!("received event from poller: {}", evt);
                self.forget(address);
            }
            PollerEvent::Stopped { address, .. } => {
                info!("received event from poller: {}", evt);
                self.forget(address);
            }
        }
    }

    fn start(&mut self, address: HostAddress) {
        if let Some(existing) = self.pollers.get(&address) {
            if !existing.task.is_finished() {
                debug!("poller for {} already running", address);
                return;
            }
            info!("poller for {} had exited, replacing it", address);
            self.pollers.remove(&address);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let cancel = self.cancel.child_token();
        let target = address.with_port(self.stats_port);
        let poller = HostPoller::new(
            address.clone(),
            target,
            generation,
            self.settings,
            self.fetcher.clone(),
            self.stats_tx.clone(),
            self.events_tx.clone(),
        );
        let task = tokio::spawn(poller.run(cancel.clone()));
        info!("started poller #{} for {}", generation, address);
        self.stats.started += 1;
        self.pollers.insert(
            address,
            PollerHandle {
                generation,
                cancel,
                task,
            },
        );
    }

    fn stop(&mut self, address: &HostAddress) {
        match self.pollers.remove(address) {
            Some(handle) => {
                handle.cancel.cancel();
                self.stats.stopped += 1;
            }
            None => debug!("no poller to stop for {}", address),
        }
    }

    fn forget(&mut self, address: &HostAddress) {
        if self.pollers.remove(address).is_some() {
            debug!("poller for {} removed", address);
        }
    }

    /// Cancel every poller and wait for them, draining their final events.
    async fn shutdown(&mut self) {
        info!("stopping {} pollers", self.pollers.len());
        let handles: Vec<_> = self.pollers.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.cancel.cancel();
        }
        for mut handle in handles {
            loop {
                tokio::select! {
                    _ = &mut handle.task => break,
                    evt = self.events_rx.recv() => {
                        if let Some(evt) = evt {
                            debug!("late poller event during shutdown: {}", evt);
                        }
                    }
                }
            }
        }
    }
}
