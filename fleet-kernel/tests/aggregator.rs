use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use uwsgi_fleet_devkit::{init_test_logging, wait_for, MockSink, StatsPayload};
use uwsgi_fleet_kernel::{
    parse_snapshot, Aggregator, AggregatorSettings, ClusterTotals, StatsSnapshot,
};

fn settings() -> AggregatorSettings {
    AggregatorSettings {
        staleness: Duration::from_secs(90),
        sweep_period: Duration::from_millis(20),
        flush_period: Duration::from_millis(30),
        push_timeout: Duration::from_millis(200),
        namespace: "uwsgi".into(),
        dimension_name: "AutoscalingGroupName".into(),
        dimension_value: "web-asg".into(),
    }
}

fn snapshot(pid: i64, busy: usize, idle: usize) -> StatsSnapshot {
    let raw = StatsPayload::new(pid).workers(busy, idle).to_json();
    parse_snapshot(raw.as_bytes(), None).unwrap()
}

#[tokio::test]
async fn test_flush_pushes_every_total() {
    init_test_logging();
    let sink = MockSink::new();
    let mut agg = Aggregator::new(settings());
    let now = Instant::now();
    agg.record(snapshot(1, 4, 6), now);
    agg.record(snapshot(2, 10, 10), now);

    let report = agg.flush(&sink, now).await;
    assert_eq!((report.pushed, report.failed), (5, 0));

    let pushed = sink.pushed();
    let names: Vec<_> = pushed.iter().map(|d| d.metric_name.as_str()).collect();
    assert_eq!(
        names,
        [
            ClusterTotals::TOTAL_WORKERS,
            ClusterTotals::IDLE_WORKERS,
            ClusterTotals::BUSY_WORKERS,
            ClusterTotals::EXCEPTIONS_COUNT,
            ClusterTotals::BUSY_WORKERS_PERCENTAGE,
        ]
    );
    assert!(pushed.iter().all(|d| d.unit == "Count" && d.dimension_value == "web-asg"));

    let latest = sink.latest();
    assert_eq!(latest["total-workers"], 30.0);
    assert_eq!(latest["busy-workers"], 14.0);
    assert_eq!(latest["idle-workers"], 16.0);
    assert_eq!(latest["busy-workers-percentage"], 90.0);
}

#[tokio::test]
async fn test_failing_sink_keeps_state() {
    init_test_logging();
    let sink = MockSink::new();
    sink.set_failing(true);
    let mut agg = Aggregator::new(settings());
    let now = Instant::now();
    agg.record(snapshot(1, 4, 6), now);

    let report = agg.flush(&sink, now).await;
    assert_eq!((report.pushed, report.failed), (0, 5));
    assert_eq!(sink.attempts(), 5);
    assert_eq!(agg.len(), 1);

    sink.set_failing(false);
    agg.record(snapshot(2, 1, 1), now);
    let report = agg.flush(&sink, now).await;
    assert_eq!(report.pushed, 5);
    assert_eq!(sink.latest()["total-workers"], 12.0);
}

#[tokio::test]
async fn test_slow_sink_hits_push_deadline() {
    init_test_logging();
    let sink = MockSink::new();
    sink.set_delay(Some(Duration::from_secs(5)));
    let mut agg = Aggregator::new(AggregatorSettings {
        push_timeout: Duration::from_millis(10),
        ..settings()
    });
    agg.record(snapshot(1, 1, 0), Instant::now());

    let report = agg.flush(&sink, Instant::now()).await;
    assert_eq!(report.failed, 5);
    assert!(sink.pushed().is_empty());
}

#[tokio::test]
async fn test_flush_never_includes_stale_hosts() {
    init_test_logging();
    let sink = MockSink::new();
    let mut agg = Aggregator::new(settings());
    let t0 = Instant::now();
    agg.record(snapshot(1, 4, 6), t0);
    agg.record(snapshot(2, 2, 2), t0 + Duration::from_secs(60));

    let report = agg.flush(&sink, t0 + Duration::from_secs(100)).await;
    assert_eq!(report.totals.hosts, 1);
    assert_eq!(sink.latest()["total-workers"], 4.0);
}

#[tokio::test]
async fn test_run_flushes_periodically_and_returns_totals() {
    init_test_logging();
    let sink = MockSink::new();
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let aggregator = Aggregator::new(settings());
    let task = tokio::spawn(aggregator.run(rx, Arc::new(sink.clone()), cancel.clone()));

    tx.send(snapshot(1, 3, 1)).await.unwrap();
    tx.send(snapshot(2, 1, 3)).await.unwrap();

    let observed = sink.clone();
    assert!(
        wait_for(Duration::from_secs(2), || {
            let observed = observed.clone();
            async move { observed.latest().get("total-workers") == Some(&8.0) }
        })
        .await
    );

    cancel.cancel();
    let totals = task.await.unwrap();
    assert_eq!(totals.busy_workers, 4.0);
    assert_eq!(totals.hosts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshot_flood_does_not_delay_flushes() {
    init_test_logging();
    let sink = MockSink::new();
    let (tx, rx) = mpsc::channel(1024);
    let cancel = CancellationToken::new();
    let aggregator = Aggregator::new(settings());
    let task = tokio::spawn(aggregator.run(rx, Arc::new(sink.clone()), cancel.clone()));

    let flood = snapshot(1, 2, 2);
    let producer = tokio::spawn(async move {
        while tx.send(flood.clone()).await.is_ok() {}
    });

    let observed = sink.clone();
    let flushed = wait_for(Duration::from_secs(2), || {
        let observed = observed.clone();
        async move { observed.attempts() >= 10 }
    })
    .await;
    cancel.cancel();
    assert!(flushed);
    assert_eq!(sink.latest()["total-workers"], 4.0);

    task.await.unwrap();
    producer.await.unwrap();
}
