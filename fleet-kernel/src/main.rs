//! uwsgi-fleet daemon
//!
//! Wires the kernel components together:
//! - one discovery watcher per configured directory path
//! - the poller supervisor, fed by every watcher
//! - the aggregator, fed by every poller, flushing to the configured sink
//!
//! Exits with an error once every watcher has terminated; Ctrl-C stops
//! everything and exits cleanly.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use uwsgi_fleet_kernel::logging::init_logging;
use uwsgi_fleet_kernel::{
    load_config, Aggregator, AggregatorSettings, Directory, DiscoveryWatcher, EtcdDirectory,
    LogSink, MetricsSink, MqttSink, PollerSettings, PollerSupervisor, SinkKind, TcpStatsFetcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cfg = load_config().await.context("Failed to load configuration")?;
    init_logging(cfg.debug);
    info!(
        "uwsgi-fleet starting: etcd {:?}, watching {:?}, stats port {}",
        cfg.etcd.endpoints, cfg.etcd.watch_dirs, cfg.uwsgi.stats_port
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => error!("cannot listen for Ctrl-C: {}", e),
            }
            cancel.cancel();
        });
    }

    let directory: Arc<dyn Directory> = Arc::new(
        EtcdDirectory::new(
            &cfg.etcd.endpoints,
            Duration::from_millis(cfg.etcd.request_timeout_ms),
        )
        .context("Failed to create etcd client")?,
    );

    let mut sink_task = None;
    let sink: Arc<dyn MetricsSink> = match cfg.sink.kind {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Mqtt => {
            let (sink, task) = MqttSink::connect(&cfg.sink.mqtt, cancel.child_token());
            info!("publishing metrics to mqtt://{}:{}", cfg.sink.mqtt.host, cfg.sink.mqtt.port);
            sink_task = Some(task);
            Arc::new(sink)
        }
    };

    let (discovery_tx, discovery_rx) = mpsc::channel(cfg.channel_capacity);
    let (stats_tx, stats_rx) = mpsc::channel(cfg.channel_capacity);

    let fetcher = Arc::new(TcpStatsFetcher::new(
        Duration::from_millis(cfg.uwsgi.connect_timeout_ms),
        Duration::from_millis(cfg.uwsgi.read_timeout_ms),
        cfg.uwsgi.max_response_bytes,
    ));
    let supervisor = PollerSupervisor::new(
        PollerSettings {
            period: cfg.uwsgi.polling_period(),
            max_retries: cfg.uwsgi.max_retries,
        },
        cfg.uwsgi.stats_port,
        fetcher,
        stats_tx,
        cfg.channel_capacity,
        cancel.child_token(),
    );
    let supervisor = tokio::spawn(supervisor.run(discovery_rx));

    let aggregator = Aggregator::new(AggregatorSettings::from_config(&cfg));
    let aggregator = tokio::spawn(aggregator.run(stats_rx, sink, cancel.child_token()));

    let watch_period = Duration::from_secs(cfg.etcd.watch_period_secs);
    let mut watchers = JoinSet::new();
    for dir in &cfg.etcd.watch_dirs {
        let watcher = DiscoveryWatcher::new(
            directory.clone(),
            dir.clone(),
            watch_period,
            discovery_tx.clone(),
        );
        watchers.spawn(watcher.run(cancel.child_token()));
    }
    drop(discovery_tx);

    let mut failed = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            joined = watchers.join_next() => match joined {
                None => break,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    failed += 1;
                    warn!("watcher stopped: {}", e);
                }
                Some(Err(e)) => {
                    failed += 1;
                    error!("watcher task failed: {}", e);
                }
            },
        }
    }

    let watchers_gone = !cancel.is_cancelled();
    cancel.cancel();
    while watchers.join_next().await.is_some() {}

    let stats = supervisor.await.context("Supervisor task failed")?;
    let totals = aggregator.await.context("Aggregator task failed")?;
    if let Some(task) = sink_task {
        task.await.context("MQTT event loop failed")?;
    }
    info!(
        "stopped: {} pollers started, {} unreachable, {} parse failures; \
         last totals {} workers on {} hosts",
        stats.started,
        stats.unreachable,
        stats.parse_failures,
        totals.total_workers,
        totals.hosts
    );

    if watchers_gone {
        bail!(
            "all {} discovery watchers terminated ({} with errors)",
            cfg.etcd.watch_dirs.len(),
            failed
        );
    }
    Ok(())
}
