//! Metrics sinks.
//!
//! The aggregator pushes one [`MetricDatum`] per cluster total per flush.
//! Failures are reported to the caller, which logs them and moves on.

pub mod log;
pub mod mqtt;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::MetricDatum;

pub use self::log::LogSink;
pub use self::mqtt::MqttSink;

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn push(&self, datum: &MetricDatum) -> Result<(), SinkError>;
}
