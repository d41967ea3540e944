//! JSON-lines output sink

use analytics_types::{AlertRecord, MetricRecord};
use async_trait::async_trait;
use processor::error::{SinkError, SinkResult};
use processor::sink::{AlertSink, MetricSink};
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes every record as one JSON line, tagged with the topic it would be
/// published to
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
    metrics_topic: String,
    alerts_topic: String,
}

impl JsonLinesSink<tokio::io::Stdout> {
    pub fn stdout(metrics_topic: impl Into<String>, alerts_topic: impl Into<String>) -> Self {
        Self::new(tokio::io::stdout(), metrics_topic, alerts_topic)
    }
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W, metrics_topic: impl Into<String>, alerts_topic: impl Into<String>) -> Self {
        Self {
            writer: Mutex::new(writer),
            metrics_topic: metrics_topic.into(),
            alerts_topic: alerts_topic.into(),
        }
    }

    async fn write_line(&self, line: serde_json::Value) -> SinkResult<()> {
        let mut bytes = serde_json::to_vec(&line).map_err(|e| SinkError::WriteFailed {
            sink: "json-lines".to_string(),
            reason: e.to_string(),
        })?;
        bytes.push(b'\n');

        self.writer
            .lock()
            .await
            .write_all(&bytes)
            .await
            .map_err(|e| SinkError::WriteFailed {
                sink: "json-lines".to_string(),
                reason: e.to_string(),
            })
    }

    async fn flush_writer(&self) -> SinkResult<()> {
        self.writer
            .lock()
            .await
            .flush()
            .await
            .map_err(|e| SinkError::WriteFailed {
                sink: "json-lines".to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MetricSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn write_metric(&self, record: &MetricRecord) -> SinkResult<()> {
        self.write_line(json!({
            "topic": self.metrics_topic,
            "key": record.metric_id,
            "value": record,
        }))
        .await
    }

    async fn flush(&self) -> SinkResult<()> {
        self.flush_writer().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AlertSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn write_alert(&self, alert: &AlertRecord) -> SinkResult<()> {
        self.write_line(json!({
            "topic": self.alerts_topic,
            "key": alert.alert_id,
            "value": alert,
        }))
        .await
    }

    async fn flush(&self) -> SinkResult<()> {
        self.flush_writer().await
    }
}
