//! Host poller: one task per discovered host.
//!
//! ```text
//! Idle -> Connecting -> AwaitingResponse -> Parsing -> Idle        (snapshot)
//!             |               |                |
//!             +---------------+--> Retrying    +--> Terminated     (parse failure)
//!                                     |
//!                                     +--> Terminated              (retry budget spent)
//! ```
//!
//! Network failures are transient and count toward a consecutive-failure
//! budget; a success resets it. A response that does not decode means the
//! remote speaks something else, so the poller gives up at once.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::PollerEvent;
use crate::fetcher::StatsFetcher;
use crate::models::{HostAddress, StatsSnapshot};
use crate::stats;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub period: Duration,
    /// Consecutive transient failures before the host is declared unreachable.
    pub max_retries: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Connecting,
    AwaitingResponse,
    Parsing,
    Retrying { failures: u32 },
    Terminated,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Snapshot(StatsSnapshot),
    Retrying { failures: u32 },
    Unreachable,
    ParseFailure,
}

pub struct HostPoller {
    /// Address as discovered; identifies this poller to the supervisor.
    address: HostAddress,
    /// Stats socket actually dialed.
    target: HostAddress,
    generation: u64,
    settings: PollerSettings,
    fetcher: Arc<dyn StatsFetcher>,
    stats_tx: mpsc::Sender<StatsSnapshot>,
    events_tx: mpsc::Sender<PollerEvent>,
    failures: u32,
    state: PollerState,
}

impl HostPoller {
    pub fn new(
        address: HostAddress,
        target: HostAddress,
        generation: u64,
        settings: PollerSettings,
        fetcher: Arc<dyn StatsFetcher>,
        stats_tx: mpsc::Sender<StatsSnapshot>,
        events_tx: mpsc::Sender<PollerEvent>,
    ) -> Self {
        debug!(
            "created poller #{} for {} (stats {}) interval {:?}",
            generation, address, target, settings.period
        );
        Self {
            address,
            target,
            generation,
            settings,
            fetcher,
            stats_tx,
            events_tx,
            failures: 0,
            state: PollerState::Idle,
        }
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Current consecutive transient-failure count.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Poll on every tick until stopped, unreachable or fed garbage.
    /// Ticks never overlap: the next one waits for the current cycle.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("poller for {} running", self.address);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.stop().await,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.stop().await,
                outcome = self.poll_once() => outcome,
            };

            match outcome {
                TickOutcome::Snapshot(snapshot) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return self.stop().await,
                        sent = self.stats_tx.send(snapshot) => {
                            if sent.is_err() {
                                info!("stats consumer gone, poller for {} quitting", self.address);
                                self.state = PollerState::Terminated;
                                return;
                            }
                        }
                    }
                }
                TickOutcome::Retrying { .. } => {}
                TickOutcome::Unreachable => {
                    warn!(
                        "maximum number of retries exceeded, poller for {} quitting",
                        self.address
                    );
                    let event = PollerEvent::Unreachable {
                        address: self.address.clone(),
                        generation: self.generation,
                    };
                    self.emit(event, &cancel).await;
                    return;
                }
                TickOutcome::ParseFailure => {
                    warn!("poller for {} quitting on undecodable stats", self.address);
                    let event = PollerEvent::ParseFailure {
                        address: self.address.clone(),
                        generation: self.generation,
                    };
                    self.emit(event, &cancel).await;
                    return;
                }
            }
        }
    }

    /// One connect/read/decode cycle. Updates the failure counter and state.
    pub async fn poll_once(&mut self) -> TickOutcome {
        self.state = PollerState::Connecting;
        let raw = match self.fetcher.connect(&self.target).await {
            Ok(conn) => {
                self.state = PollerState::AwaitingResponse;
                conn.read_to_end().await
            }
            Err(e) => Err(e),
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                self.failures += 1;
                warn!(
                    "error getting stats from {}: {} (failure {}/{}), host might be down",
                    self.target, e, self.failures, self.settings.max_retries
                );
                if self.failures >= self.settings.max_retries {
                    self.state = PollerState::Terminated;
                    return TickOutcome::Unreachable;
                }
                self.state = PollerState::Retrying {
                    failures: self.failures,
                };
                return TickOutcome::Retrying {
                    failures: self.failures,
                };
            }
        };

        self.state = PollerState::Parsing;
        match stats::parse_snapshot(&raw, Some(self.address.clone())) {
            Ok(snapshot) => {
                if self.failures > 0 {
                    info!("{} answering again after {} failures", self.target, self.failures);
                }
                self.failures = 0;
                self.state = PollerState::Idle;
                TickOutcome::Snapshot(snapshot)
            }
            Err(e) => {
                warn!("error loading stats from {}: {}", self.target, e);
                self.state = PollerState::Terminated;
                TickOutcome::ParseFailure
            }
        }
    }

    async fn stop(&mut self) {
        info!("poller for {} quitting", self.address);
        self.state = PollerState::Terminated;
        // the supervisor may already be gone at shutdown
        let _ = self
            .events_tx
            .send(PollerEvent::Stopped {
                address: self.address.clone(),
                generation: self.generation,
            })
            .await;
    }

    /// Send a terminal event; a stop arriving meanwhile turns it into `Stopped`.
    async fn emit(&mut self, event: PollerEvent, cancel: &CancellationToken) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => self.stop().await,
            _ = self.events_tx.send(event) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::StatsConnection;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Step {
        Refuse,
        Body(&'static str),
    }

    struct Script(Mutex<VecDeque<Step>>);

    struct Body(&'static str);

    #[async_trait]
    impl StatsConnection for Body {
        async fn read_to_end(self: Box<Self>) -> Result<Vec<u8>, FetchError> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    #[async_trait]
    impl StatsFetcher for Script {
        async fn connect(
            &self,
            target: &HostAddress,
        ) -> Result<Box<dyn StatsConnection>, FetchError> {
            let step = self.0.lock().unwrap().pop_front().unwrap_or(Step::Refuse);
            match step {
                Step::Refuse => Err(FetchError::Connect {
                    target: target.to_string(),
                    source: std::io::ErrorKind::ConnectionRefused.into(),
                }),
                Step::Body(body) => Ok(Box::new(Body(body))),
            }
        }
    }

    const OK: &str = r#"{"cwd": "/srv", "uid": 1, "gid": 1, "pid": 9,
        "workers": [{"status": "busy"}, {"status": "idle"}]}"#;

    fn poller(
        steps: Vec<Step>,
    ) -> (HostPoller, mpsc::Receiver<StatsSnapshot>, mpsc::Receiver<PollerEvent>) {
        let (stats_tx, stats_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(8);
        let addr = HostAddress::new("web-1", 3031);
        let p = HostPoller::new(
            addr.clone(),
            addr.with_port(12321),
            1,
            PollerSettings {
                period: Duration::from_millis(5),
                max_retries: 5,
            },
            Arc::new(Script(Mutex::new(steps.into()))),
            stats_tx,
            events_tx,
        );
        (p, stats_rx, events_rx)
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let steps = vec![Step::Refuse, Step::Refuse, Step::Refuse, Step::Body(OK)];
        let (mut p, _s, _e) = poller(steps);
        for expected in 1..=3 {
            assert_eq!(p.poll_once().await, TickOutcome::Retrying { failures: expected });
            assert_eq!(p.state(), PollerState::Retrying { failures: expected });
        }
        match p.poll_once().await {
            TickOutcome::Snapshot(s) => {
                assert_eq!(s.busy_workers, 1);
                assert_eq!(s.source, Some(HostAddress::new("web-1", 3031)));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert_eq!(p.failures(), 0);
        assert_eq!(p.state(), PollerState::Idle);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let (mut p, _s, _e) = poller(vec![]);
        for _ in 0..4 {
            assert!(matches!(p.poll_once().await, TickOutcome::Retrying { .. }));
        }
        assert_eq!(p.poll_once().await, TickOutcome::Unreachable);
        assert_eq!(p.state(), PollerState::Terminated);
    }

    #[tokio::test]
    async fn test_parse_failure_does_not_count_as_transient() {
        let (mut p, _s, _e) = poller(vec![Step::Refuse, Step::Body("<html>")]);
        assert!(matches!(p.poll_once().await, TickOutcome::Retrying { failures: 1 }));
        assert_eq!(p.poll_once().await, TickOutcome::ParseFailure);
        assert_eq!(p.failures(), 1);
        assert_eq!(p.state(), PollerState::Terminated);
    }

    #[tokio::test]
    async fn test_stop_while_reporting_unreachable_emits_stopped() {
        let (stats_tx, _stats_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let addr = HostAddress::new("web-1", 3031);
        let filler = PollerEvent::Stopped {
            address: HostAddress::new("other", 1),
            generation: 99,
        };
        events_tx.send(filler.clone()).await.unwrap();

        let p = HostPoller::new(
            addr.clone(),
            addr.with_port(12321),
            3,
            PollerSettings {
                period: Duration::from_millis(5),
                max_retries: 1,
            },
            Arc::new(Script(Mutex::new(VecDeque::new()))),
            stats_tx,
            events_tx,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(p.run(cancel.clone()));

        // the Unreachable send is stuck behind the filler
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        cancel.cancel();

        assert_eq!(events_rx.recv().await, Some(filler));
        assert_eq!(
            events_rx.recv().await,
            Some(PollerEvent::Stopped {
                address: addr,
                generation: 3
            })
        );
        task.await.unwrap();
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_emits_stopped() {
        let (p, _s, mut events) = poller(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        p.run(cancel).await;
        assert_eq!(
            events.recv().await,
            Some(PollerEvent::Stopped {
                address: HostAddress::new("web-1", 3031),
                generation: 1
            })
        );
    }
}
