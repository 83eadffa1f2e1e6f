use async_trait::async_trait;
use tracing::info;

use super::MetricsSink;
use crate::error::SinkError;
use crate::models::MetricDatum;

/// Writes every datum to the log. Default sink, and handy for dry runs.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn push(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        info!(
            metric = %datum.metric_name,
            namespace = %datum.namespace,
            dimension = %format!("{}={}", datum.dimension_name, datum.dimension_value),
            unit = %datum.unit,
            value = datum.value,
            "metric"
        );
        Ok(())
    }
}
