//! Cluster aggregator.
//!
//! Keeps the latest snapshot of every host (keyed by [`HostId`], not by
//! address), evicts hosts that stopped reporting, and periodically pushes the
//! cluster totals to a [`MetricsSink`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::FleetConfig;
use crate::error::SinkError;
use crate::models::{ClusterTotals, HostId, MetricDatum, StatsSnapshot};
use crate::sink::MetricsSink;

pub const METRIC_UNIT: &str = "Count";

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorSettings {
    pub staleness: Duration,
    pub sweep_period: Duration,
    pub flush_period: Duration,
    pub push_timeout: Duration,
    pub namespace: String,
    pub dimension_name: String,
    pub dimension_value: String,
}

impl AggregatorSettings {
    pub fn from_config(cfg: &FleetConfig) -> Self {
        Self {
            staleness: cfg.staleness(),
            sweep_period: Duration::from_secs(cfg.aggregator.sweep_period_secs),
            flush_period: Duration::from_secs(cfg.aggregator.flush_period_secs),
            push_timeout: Duration::from_millis(cfg.aggregator.push_timeout_ms),
            namespace: cfg.sink.namespace.clone(),
            dimension_name: cfg.sink.dimension_name.clone(),
            dimension_value: cfg.sink.dimension_value.clone(),
        }
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from_config(&FleetConfig::default())
    }
}

#[derive(Debug, Clone)]
struct HostEntry {
    snapshot: StatsSnapshot,
    last_seen: Instant,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub totals: ClusterTotals,
    pub pushed: usize,
    pub failed: usize,
}

pub struct Aggregator {
    settings: AggregatorSettings,
    hosts: HashMap<HostId, HostEntry>,
}

impl Aggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        info!(
            "aggregator: staleness {:?}, flush every {:?}",
            settings.staleness, settings.flush_period
        );
        Self {
            settings,
            hosts: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn contains(&self, id: &HostId) -> bool {
        self.hosts.contains_key(id)
    }

    /// Upsert; the latest arrival wins.
    pub fn record(&mut self, snapshot: StatsSnapshot, now: Instant) {
        debug!(
            "snapshot for {} from {:?}: {}/{} busy",
            snapshot.host_id, snapshot.source, snapshot.busy_workers, snapshot.total_workers
        );
        self.hosts.insert(
            snapshot.host_id.clone(),
            HostEntry {
                snapshot,
                last_seen: now,
            },
        );
    }

    /// Drop every host not seen within the staleness window.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<HostId> {
        let staleness = self.settings.staleness;
        let mut evicted = Vec::new();
        self.hosts.retain(|id, entry| {
            if now.saturating_duration_since(entry.last_seen) > staleness {
                info!("removing stale host {} (source {:?})", id, entry.snapshot.source);
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Sums over every host currently held.
    pub fn totals(&self) -> ClusterTotals {
        let mut totals = ClusterTotals::default();
        for entry in self.hosts.values() {
            let s = &entry.snapshot;
            totals.total_workers += s.total_workers as f64;
            totals.idle_workers += s.idle_workers as f64;
            totals.busy_workers += s.busy_workers as f64;
            totals.exceptions_count += s.exceptions_count as f64;
            totals.busy_workers_percentage += s.busy_workers_percentage;
            totals.hosts += 1;
        }
        totals
    }

    fn datum(&self, name: &str, value: f64) -> MetricDatum {
        MetricDatum {
            metric_name: name.to_string(),
            namespace: self.settings.namespace.clone(),
            dimension_name: self.settings.dimension_name.clone(),
            dimension_value: self.settings.dimension_value.clone(),
            unit: METRIC_UNIT.to_string(),
            value,
        }
    }

    /// Sweep, then push every named total. A failed push is logged and the
    /// remaining metrics are still pushed; state is left untouched.
    pub async fn flush(&mut self, sink: &dyn MetricsSink, now: Instant) -> FlushReport {
        self.evict_stale(now);
        let totals = self.totals();
        let mut report = FlushReport {
            totals,
            ..FlushReport::default()
        };
        for (name, value) in totals.named() {
            let datum = self.datum(name, value);
            let res = match timeout(self.settings.push_timeout, sink.push(&datum)).await {
                Ok(res) => res,
                Err(_) => Err(SinkError::Timeout {
                    metric: name.to_string(),
                    timeout: self.settings.push_timeout,
                }),
            };
            match res {
                Ok(()) => report.pushed += 1,
                Err(e) => {
                    error!("error pushing {} = {}: {}", name, value, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "flushed {} hosts: {} workers, {} busy, {} pushed, {} failed",
            totals.hosts, totals.total_workers, totals.busy_workers, report.pushed, report.failed
        );
        report
    }

    /// Consume snapshots until cancelled or the channel closes. Returns the
    /// totals of the last state, without a final flush.
    pub async fn run(
        mut self,
        mut snapshots: mpsc::Receiver<StatsSnapshot>,
        sink: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> ClusterTotals {
        let start = Instant::now();
        let mut sweep = interval_at(start + self.settings.sweep_period, self.settings.sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = interval_at(start + self.settings.flush_period, self.settings.flush_period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                // timers before snapshots: a busy channel must not delay a flush
                _ = flush.tick() => {
                    self.flush(sink.as_ref(), Instant::now()).await;
                }
                _ = sweep.tick() => {
                    self.evict_stale(Instant::now());
                }
                snapshot = snapshots.recv() => match snapshot {
                    Some(snapshot) => self.record(snapshot, Instant::now()),
                    None => {
                        info!("snapshot channel closed, aggregator exiting");
                        break;
                    }
                },
            }
        }
        self.totals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::parse_snapshot;

    fn snapshot(pid: i64, total: usize, busy: usize) -> StatsSnapshot {
        let workers: Vec<String> = (0..total)
            .map(|i| {
                let status = if i < busy { "busy" } else { "idle" };
                format!(r#"{{"status": "{status}", "exceptions": 1}}"#)
            })
            .collect();
        let raw = format!(
            r#"{{"cwd": "/srv", "uid": 1, "gid": 1, "pid": {pid}, "workers": [{}]}}"#,
            workers.join(",")
        );
        parse_snapshot(raw.as_bytes(), None).unwrap()
    }

    fn aggregator(staleness: Duration) -> Aggregator {
        Aggregator::new(AggregatorSettings {
            staleness,
            ..AggregatorSettings::default()
        })
    }

    #[test]
    fn test_totals_sum_per_host_percentages() {
        let mut agg = aggregator(Duration::from_secs(90));
        let now = Instant::now();
        agg.record(snapshot(1, 10, 4), now);
        agg.record(snapshot(2, 20, 10), now);

        let t = agg.totals();
        assert_eq!(t.total_workers, 30.0);
        assert_eq!(t.busy_workers, 14.0);
        assert_eq!(t.idle_workers, 16.0);
        assert_eq!(t.exceptions_count, 30.0);
        assert_eq!(t.busy_workers_percentage, 90.0);
        assert_eq!(t.hosts, 2);
    }

    #[test]
    fn test_latest_snapshot_wins() {
        let mut agg = aggregator(Duration::from_secs(90));
        let now = Instant::now();
        agg.record(snapshot(1, 10, 4), now);
        agg.record(snapshot(1, 10, 9), now);
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.totals().busy_workers, 9.0);
    }

    #[test]
    fn test_stale_host_is_evicted() {
        let mut agg = aggregator(Duration::from_secs(90));
        let t0 = Instant::now();
        agg.record(snapshot(1, 10, 4), t0);
        agg.record(snapshot(2, 20, 10), t0 + Duration::from_secs(60));

        assert!(agg.evict_stale(t0 + Duration::from_secs(90)).is_empty());
        let evicted = agg.evict_stale(t0 + Duration::from_secs(91));
        assert_eq!(evicted, vec![HostId::from_parts("/srv", 1, 1, 1)]);
        assert_eq!(agg.totals().total_workers, 20.0);
    }

    #[test]
    fn test_empty_totals_are_zero() {
        let agg = aggregator(Duration::from_secs(90));
        assert_eq!(agg.totals(), ClusterTotals::default());
    }
}
