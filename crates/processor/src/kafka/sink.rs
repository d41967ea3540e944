use analytics_types::{AlertRecord, MetricRecord};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::trace;

use super::KafkaConfig;
use crate::error::{ProcessorError, SinkError, SinkResult};
use crate::sink::{AlertSink, MetricSink};

const SINK_NAME: &str = "kafka";

/// Producer for metric and alert records
#[derive(Clone)]
pub struct KafkaRecordSink {
    producer: FutureProducer,
    metrics_topic: String,
    alerts_topic: String,
    send_timeout: Duration,
}

impl KafkaRecordSink {
    pub fn new(config: &KafkaConfig) -> crate::error::Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                config.send_timeout_ms.to_string(),
            );
        for (key, value) in &config.extra_config {
            client_config.set(key, value);
        }

        let producer: FutureProducer =
            client_config
                .create()
                .map_err(|e| ProcessorError::Configuration {
                    source: Box::new(e),
                })?;

        Ok(Self {
            producer,
            metrics_topic: config.metrics_topic.clone(),
            alerts_topic: config.alerts_topic.clone(),
            send_timeout: config.send_timeout(),
        })
    }

    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> SinkResult<()> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| SinkError::WriteFailed {
                sink: SINK_NAME.to_string(),
                reason: e.to_string(),
            })?;

        trace!(topic = topic, key = key, partition = partition, offset = offset, "Record delivered");
        Ok(())
    }

    async fn flush_producer(&self) -> SinkResult<()> {
        let producer = self.producer.clone();
        let timeout = self.send_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| SinkError::WriteFailed {
                sink: SINK_NAME.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|e| SinkError::WriteFailed {
                sink: SINK_NAME.to_string(),
                reason: e.to_string(),
            })
    }
}

fn encode<T: serde::Serialize>(record: &T) -> SinkResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| SinkError::WriteFailed {
        sink: SINK_NAME.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl MetricSink for KafkaRecordSink {
    fn name(&self) -> &str {
        &self.metrics_topic
    }

    async fn write_metric(&self, record: &MetricRecord) -> SinkResult<()> {
        let payload = encode(record)?;
        self.send(&self.metrics_topic, &record.metric_id, payload).await
    }

    async fn flush(&self) -> SinkResult<()> {
        self.flush_producer().await
    }
}

#[async_trait]
impl AlertSink for KafkaRecordSink {
    fn name(&self) -> &str {
        &self.alerts_topic
    }

    async fn write_alert(&self, alert: &AlertRecord) -> SinkResult<()> {
        let payload = encode(alert)?;
        self.send(&self.alerts_topic, &alert.alert_id, payload).await
    }

    async fn flush(&self) -> SinkResult<()> {
        self.flush_producer().await
    }
}
