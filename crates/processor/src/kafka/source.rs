use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info};

use super::KafkaConfig;
use crate::error::{ProcessorError, Result};
use crate::source::{EventSource, SourceRecord};

fn source_error(e: rdkafka::error::KafkaError) -> ProcessorError {
    ProcessorError::Source {
        source: Box::new(e),
    }
}

/// Kafka consumer over an explicitly assigned set of partitions
///
/// Auto-commit is disabled; offsets are committed by the worker after a
/// checkpoint. Without a seek, reading starts from the group's committed
/// offsets.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
    partitions: Vec<u32>,
    poll_timeout: Duration,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        config.validate()?;

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest");
        for (key, value) in &config.extra_config {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer =
            client_config
                .create()
                .map_err(|e| ProcessorError::Configuration {
                    source: Box::new(e),
                })?;

        let mut assignment = TopicPartitionList::new();
        for partition in &config.partitions {
            assignment.add_partition(&config.input_topic, *partition as i32);
        }
        consumer.assign(&assignment).map_err(source_error)?;

        info!(
            topic = %config.input_topic,
            partitions = ?config.partitions,
            group_id = %config.group_id,
            "Assigned Kafka partitions"
        );

        Ok(Self {
            consumer,
            topic: config.input_topic.clone(),
            partitions: config.partitions.clone(),
            poll_timeout: config.poll_timeout(),
        })
    }

    fn partition_list(&self, offsets: &BTreeMap<u32, i64>) -> Result<TopicPartitionList> {
        let mut list = TopicPartitionList::new();
        for (partition, offset) in offsets {
            list.add_partition_offset(&self.topic, *partition as i32, Offset::Offset(*offset))
                .map_err(source_error)?;
        }
        Ok(list)
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    fn name(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self) -> Result<Option<SourceRecord>> {
        match time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(SourceRecord::new(
                message.partition() as u32,
                message.offset(),
                message.payload().unwrap_or_default(),
            ))),
            Ok(Err(e)) => Err(source_error(e)),
        }
    }

    /// Re-assign the owned partitions at the given offsets
    async fn seek(&mut self, offsets: &BTreeMap<u32, i64>) -> Result<()> {
        let mut assignment = TopicPartitionList::new();
        for partition in &self.partitions {
            let offset = offsets
                .get(partition)
                .map(|offset| Offset::Offset(*offset))
                .unwrap_or(Offset::Stored);
            assignment
                .add_partition_offset(&self.topic, *partition as i32, offset)
                .map_err(source_error)?;
        }
        self.consumer.assign(&assignment).map_err(source_error)?;
        debug!(offsets = ?offsets, "Seeked Kafka consumer");
        Ok(())
    }

    async fn commit(&mut self, offsets: &BTreeMap<u32, i64>) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let list = self.partition_list(offsets)?;
        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(source_error)?;
        debug!(offsets = ?offsets, "Committed Kafka offsets");
        Ok(())
    }
}
