use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use uwsgi_fleet_devkit::{init_test_logging, wait_for, ScriptedFetcher, StatsPayload, Step};
use uwsgi_fleet_kernel::{
    DiscoveryEvent, HostAddress, PollerSettings, PollerSupervisor, StatsSnapshot,
};

const STATS_PORT: u16 = 12321;
const WAIT: Duration = Duration::from_secs(2);

struct Rig {
    fetcher: ScriptedFetcher,
    discovery: mpsc::Sender<DiscoveryEvent>,
    snapshots: mpsc::Receiver<StatsSnapshot>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<uwsgi_fleet_kernel::SupervisorStats>,
}

fn rig(max_retries: u32) -> Rig {
    init_test_logging();
    let fetcher = ScriptedFetcher::new();
    let (stats_tx, snapshots) = mpsc::channel(256);
    let (discovery, discovery_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let sup = PollerSupervisor::new(
        PollerSettings {
            period: Duration::from_millis(5),
            max_retries,
        },
        STATS_PORT,
        Arc::new(fetcher.clone()),
        stats_tx,
        16,
        cancel.clone(),
    );
    let task = tokio::spawn(sup.run(discovery_rx));
    Rig {
        fetcher,
        discovery,
        snapshots,
        cancel,
        task,
    }
}

fn host(s: &str) -> HostAddress {
    s.parse().unwrap()
}

fn stats_target(s: &str) -> HostAddress {
    host(s).with_port(STATS_PORT)
}

#[tokio::test]
async fn test_removed_host_stops_polling() {
    let mut rig = rig(1000);
    rig.fetcher
        .set_default(Step::Body(StatsPayload::new(1).workers(1, 1).to_json()));
    rig.discovery.send(DiscoveryEvent::Added(host("a:3031"))).await.unwrap();
    rig.discovery.send(DiscoveryEvent::Added(host("a:3031"))).await.unwrap();
    rig.discovery.send(DiscoveryEvent::Added(host("b:3031"))).await.unwrap();

    let f = rig.fetcher.clone();
    assert!(
        wait_for(WAIT, || {
            let f = f.clone();
            async move { f.connects(&stats_target("a:3031")) >= 2 }
        })
        .await
    );

    rig.discovery.send(DiscoveryEvent::Removed(host("a:3031"))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let a_after_stop = rig.fetcher.connects(&stats_target("a:3031"));
    let b_before = rig.fetcher.connects(&stats_target("b:3031"));
    while rig.snapshots.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(rig.fetcher.connects(&stats_target("a:3031")), a_after_stop);
    assert!(rig.fetcher.connects(&stats_target("b:3031")) > b_before);

    rig.cancel.cancel();
    let stats = tokio::time::timeout(WAIT, rig.task).await.unwrap().unwrap();
    assert_eq!(stats.started, 2);
    assert_eq!(stats.stopped, 1);
}

#[tokio::test]
async fn test_unreachable_host_can_be_rediscovered() {
    let rig = rig(2);
    rig.discovery.send(DiscoveryEvent::Added(host("a:3031"))).await.unwrap();

    let f = rig.fetcher.clone();
    assert!(
        wait_for(WAIT, || {
            let f = f.clone();
            async move { f.connects(&stats_target("a:3031")) == 2 }
        })
        .await
    );
    // let the supervisor process the Unreachable event
    tokio::time::sleep(Duration::from_millis(30)).await;

    rig.discovery.send(DiscoveryEvent::Added(host("a:3031"))).await.unwrap();
    assert!(
        wait_for(WAIT, || {
            let f = f.clone();
            async move { f.connects(&stats_target("a:3031")) == 4 }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(30)).await;

    rig.cancel.cancel();
    let stats = tokio::time::timeout(WAIT, rig.task).await.unwrap().unwrap();
    assert_eq!(stats.started, 2);
    assert_eq!(stats.unreachable, 2);
}

#[tokio::test]
async fn test_parse_failure_is_counted() {
    let rig = rig(5);
    rig.fetcher
        .script(&stats_target("a:3031"), [Step::Body("{\"not\": \"uwsgi\"}".into())]);
    rig.discovery.send(DiscoveryEvent::Added(host("a:3031"))).await.unwrap();

    let f = rig.fetcher.clone();
    assert!(
        wait_for(WAIT, || {
            let f = f.clone();
            async move { f.connects(&stats_target("a:3031")) == 1 }
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(rig.fetcher.connects(&stats_target("a:3031")), 1);

    // closing discovery with no pollers left ends the supervisor
    drop(rig.discovery);
    let stats = tokio::time::timeout(WAIT, rig.task).await.unwrap().unwrap();
    assert_eq!(stats.parse_failures, 1);
}

#[tokio::test]
async fn test_cancel_shuts_down_every_poller() {
    let rig = rig(1000);
    for name in ["a:1", "b:1", "c:1"] {
        rig.discovery.send(DiscoveryEvent::Added(host(name))).await.unwrap();
    }
    let f = rig.fetcher.clone();
    assert!(
        wait_for(WAIT, || {
            let f = f.clone();
            async move { f.connects(&stats_target("c:1")) >= 1 }
        })
        .await
    );

    rig.cancel.cancel();
    let stats = tokio::time::timeout(WAIT, rig.task).await.unwrap().unwrap();
    assert_eq!(stats.started, 3);

    let frozen = rig.fetcher.connects(&stats_target("a:1"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(rig.fetcher.connects(&stats_target("a:1")), frozen);
}
