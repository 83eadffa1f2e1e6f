//! uWSGI fleet kernel
//!
//! Watches directory-service paths for `host:port` entries, polls the uWSGI
//! stats socket of every discovered host, and pushes cluster-wide worker
//! totals to a metrics sink.
//!
//! ```text
//! DiscoveryWatcher --DiscoveryEvent--> PollerSupervisor --spawns--> HostPoller*
//!                                            ^                        |   |
//!                                            +------PollerEvent-------+   |
//!                                                                         v
//!                          MetricsSink <--flush-- Aggregator <--StatsSnapshot
//! ```

pub mod aggregator;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod logging;
pub mod models;
pub mod poller;
pub mod sink;
pub mod stats;
pub mod supervisor;

pub use aggregator::{Aggregator, AggregatorSettings, FlushReport};
pub use config::{load_config, FleetConfig, SinkKind};
pub use directory::{DirEntry, DirListing, Directory, EtcdDirectory};
pub use discovery::{diff_hosts, CycleReport, DiscoveryWatcher, HostDiff};
pub use error::{
    AddressError, ConfigError, DirectoryError, DiscoveryError, FetchError, SinkError, StatsError,
};
pub use events::{DiscoveryEvent, PollerEvent};
pub use fetcher::{StatsConnection, StatsFetcher, TcpStatsFetcher};
pub use models::{ClusterTotals, DiscoverySet, HostAddress, HostId, MetricDatum, StatsSnapshot};
pub use poller::{HostPoller, PollerSettings, PollerState, TickOutcome};
pub use sink::{LogSink, MetricsSink, MqttSink};
pub use stats::{parse_snapshot, UwsgiStats};
pub use supervisor::{PollerSupervisor, SupervisorStats};
