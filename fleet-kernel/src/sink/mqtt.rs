//! MQTT metrics sink.
//!
//! Each datum is published as JSON to `{topic_prefix}/{namespace}/{metric}`.
//! The rumqttc event loop is driven by its own task; publishing only queues
//! the message on the client's request channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::MetricsSink;
use crate::config::MqttConf;
use crate::error::SinkError;
use crate::models::MetricDatum;

#[derive(Debug, Serialize)]
struct MetricMessage<'a> {
    #[serde(flatten)]
    datum: &'a MetricDatum,
    timestamp: DateTime<Utc>,
}

pub struct MqttSink {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttSink {
    /// Build the client and spawn its event loop. The loop stops with `cancel`.
    pub fn connect(conf: &MqttConf, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let mut opts = MqttOptions::new(conf.client_id.clone(), conf.host.clone(), conf.port);
        opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs.max(5)));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        let endpoint = format!("{}:{}", conf.host, conf.port);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(event) => debug!("mqtt event: {:?}", event),
                        Err(e) => {
                            warn!("MQTT error on {}: {}", endpoint, e);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                            }
                        }
                    },
                }
            }
            debug!("mqtt event loop for {} stopped", endpoint);
        });

        (
            Self {
                client,
                topic_prefix: conf.topic_prefix.trim_end_matches('/').to_string(),
            },
            task,
        )
    }

    pub fn topic_for(&self, datum: &MetricDatum) -> String {
        metric_topic(&self.topic_prefix, datum)
    }
}

fn metric_topic(prefix: &str, datum: &MetricDatum) -> String {
    format!("{}/{}/{}", prefix, datum.namespace, datum.metric_name)
}

fn encode(datum: &MetricDatum, timestamp: DateTime<Utc>) -> Result<Vec<u8>, SinkError> {
    Ok(serde_json::to_vec(&MetricMessage { datum, timestamp })?)
}

#[async_trait]
impl MetricsSink for MqttSink {
    async fn push(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        let payload = encode(datum, Utc::now())?;
        let topic = self.topic_for(datum);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| SinkError::Rejected {
                metric: datum.metric_name.clone(),
                reason: e.to_string(),
            })
    }
}
