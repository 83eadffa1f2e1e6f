//! Watcher -> supervisor -> pollers -> aggregator -> sink, over a real TCP
//! stats socket.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use uwsgi_fleet_devkit::{
    init_test_logging, wait_for, FakeStatsServer, MockDirectory, MockSink, StatsPayload,
};
use uwsgi_fleet_kernel::{
    Aggregator, AggregatorSettings, DiscoveryWatcher, PollerSettings, PollerSupervisor,
    TcpStatsFetcher,
};

async fn total_workers_becomes(sink: &MockSink, expected: f64) -> bool {
    let sink = sink.clone();
    wait_for(Duration::from_secs(3), || {
        let sink = sink.clone();
        async move { sink.latest().get("total-workers") == Some(&expected) }
    })
    .await
}

#[tokio::test]
async fn test_discovered_host_reaches_the_sink_and_ages_out() {
    init_test_logging();
    let payload = StatsPayload::new(777).workers(6, 4);
    let server = FakeStatsServer::start(payload.to_json()).await.unwrap();

    let dir = MockDirectory::new();
    // the registered port is the app port; stats are read from the fleet-wide port
    dir.set("/services/web/node-1", "127.0.0.1:3031");

    let cancel = CancellationToken::new();
    let sink = MockSink::new();
    let (discovery_tx, discovery_rx) = mpsc::channel(16);
    let (stats_tx, stats_rx) = mpsc::channel(16);

    let supervisor = PollerSupervisor::new(
        PollerSettings {
            period: Duration::from_millis(20),
            max_retries: 5,
        },
        server.port(),
        Arc::new(TcpStatsFetcher::new(
            Duration::from_millis(500),
            Duration::from_millis(500),
            1 << 20,
        )),
        stats_tx,
        16,
        cancel.child_token(),
    );
    let supervisor = tokio::spawn(supervisor.run(discovery_rx));

    let aggregator = Aggregator::new(AggregatorSettings {
        staleness: Duration::from_millis(150),
        sweep_period: Duration::from_millis(20),
        flush_period: Duration::from_millis(40),
        push_timeout: Duration::from_millis(200),
        namespace: "uwsgi".into(),
        dimension_name: "AutoscalingGroupName".into(),
        dimension_value: "it".into(),
    });
    let aggregator =
        tokio::spawn(aggregator.run(stats_rx, Arc::new(sink.clone()), cancel.child_token()));

    let watcher = DiscoveryWatcher::new(
        Arc::new(dir.clone()),
        "/services/web",
        Duration::from_millis(20),
        discovery_tx,
    );
    let watcher = tokio::spawn(watcher.run(cancel.child_token()));

    assert!(total_workers_becomes(&sink, 10.0).await);
    assert_eq!(sink.latest()["busy-workers"], 6.0);
    assert_eq!(sink.latest()["busy-workers-percentage"], 60.0);
    assert!(server.connections() >= 1);

    // deregistering stops the poller; the host then goes stale
    dir.remove("/services/web/node-1");
    assert!(total_workers_becomes(&sink, 0.0).await);

    cancel.cancel();
    assert!(watcher.await.unwrap().is_ok());
    let stats = supervisor.await.unwrap();
    assert_eq!(stats.started, 1);
    assert_eq!(stats.stopped, 1);
    let totals = aggregator.await.unwrap();
    assert_eq!(totals.hosts, 0);
}
