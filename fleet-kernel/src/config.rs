use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "UWSGI_FLEET_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "uwsgi-fleet.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub debug: bool,
    /// Capacity of every inter-task channel.
    pub channel_capacity: usize,
    pub etcd: EtcdConf,
    pub uwsgi: UwsgiConf,
    pub aggregator: AggregatorConf,
    pub sink: SinkConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConf {
    pub endpoints: Vec<String>,
    pub watch_dirs: Vec<String>,
    pub watch_period_secs: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UwsgiConf {
    pub polling_period_secs: u64,
    /// Stats socket port, the same on every host of the fleet.
    pub stats_port: u16,
    pub max_retries: u32,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_response_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConf {
    pub flush_period_secs: u64,
    pub sweep_period_secs: u64,
    /// Unset means 3x the uWSGI polling period.
    pub staleness_secs: Option<u64>,
    pub push_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Mqtt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConf {
    pub kind: SinkKind,
    pub namespace: String,
    pub dimension_name: String,
    pub dimension_value: String,
    pub mqtt: MqttConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            debug: false,
            channel_capacity: 100,
            etcd: EtcdConf::default(),
            uwsgi: UwsgiConf::default(),
            aggregator: AggregatorConf::default(),
            sink: SinkConf::default(),
        }
    }
}

impl Default for EtcdConf {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:4001".into()],
            watch_dirs: vec!["/".into()],
            watch_period_secs: 30,
            request_timeout_ms: 1000,
        }
    }
}

impl Default for UwsgiConf {
    fn default() -> Self {
        Self {
            polling_period_secs: 30,
            stats_port: 12321,
            max_retries: 5,
            connect_timeout_ms: 2000,
            read_timeout_ms: 5000,
            max_response_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for AggregatorConf {
    fn default() -> Self {
        Self {
            flush_period_secs: 60,
            sweep_period_secs: 30,
            staleness_secs: None,
            push_timeout_ms: 5000,
        }
    }
}

impl Default for SinkConf {
    fn default() -> Self {
        Self {
            kind: SinkKind::Log,
            namespace: "uwsgi".into(),
            dimension_name: "AutoscalingGroupName".into(),
            dimension_value: "default".into(),
            mqtt: MqttConf::default(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "uwsgi-fleet".into(),
            topic_prefix: "uwsgi-fleet/metrics".into(),
            keep_alive_secs: 15,
        }
    }
}

impl UwsgiConf {
    pub fn polling_period(&self) -> Duration {
        Duration::from_secs(self.polling_period_secs)
    }
}

impl FleetConfig {
    pub fn from_yaml_str(txt: &str, origin: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt).map_err(|source| ConfigError::Yaml {
            path: origin.to_string(),
            source,
        })
    }

    pub async fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let txt = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: display.clone(),
                source,
            })?;
        Self::from_yaml_str(&txt, &display)
    }

    /// Apply the `UWSGI_FLEET_*` overrides through a lookup function.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("UWSGI_FLEET_ETCD_ENDPOINTS") {
            self.etcd.endpoints = split_list(&v);
        }
        if let Some(v) = lookup("UWSGI_FLEET_WATCH_DIRS") {
            self.etcd.watch_dirs = split_list(&v);
        }
        if let Some(v) = lookup("UWSGI_FLEET_STATS_PORT") {
            self.uwsgi.stats_port = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "UWSGI_FLEET_STATS_PORT".into(),
                reason: format!("not a port: {v:?}"),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&str, bool); 8] = [
            ("channel_capacity", self.channel_capacity > 0),
            ("etcd.endpoints", !self.etcd.endpoints.is_empty()),
            ("etcd.watch_dirs", !self.etcd.watch_dirs.is_empty()),
            ("etcd.watch_period_secs", self.etcd.watch_period_secs > 0),
            ("uwsgi.polling_period_secs", self.uwsgi.polling_period_secs > 0),
            ("uwsgi.max_retries", self.uwsgi.max_retries > 0),
            ("aggregator.flush_period_secs", self.aggregator.flush_period_secs > 0),
            ("aggregator.sweep_period_secs", self.aggregator.sweep_period_secs > 0),
        ];
        for (key, ok) in checks {
            if !ok {
                return Err(ConfigError::Invalid {
                    key: key.into(),
                    reason: "must be non-zero / non-empty".into(),
                });
            }
        }
        if self.aggregator.staleness_secs == Some(0) {
            return Err(ConfigError::Invalid {
                key: "aggregator.staleness_secs".into(),
                reason: "must be non-zero when set".into(),
            });
        }
        Ok(())
    }

    /// How long a host may go without a snapshot before it is evicted.
    pub fn staleness(&self) -> Duration {
        match self.aggregator.staleness_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.uwsgi.polling_period() * 3,
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Read the config file named by `UWSGI_FLEET_CONFIG`, then env overrides.
pub async fn load_config() -> Result<FleetConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = if Path::new(&path).exists() {
        info!("loading config from {}", path);
        FleetConfig::from_path(Path::new(&path)).await?
    } else {
        warn!("no {} found, using default config", path);
        FleetConfig::default()
    };
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
