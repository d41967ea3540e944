use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ProcessorError, Result};

/// Kafka connection and topic configuration
///
/// Read from the `kafka` section of the engine configuration file and from
/// `ANALYTICS_KAFKA__*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default = "default_group_id")]
    pub group_id: String,

    #[serde(default = "default_input_topic")]
    pub input_topic: String,

    /// Input partitions owned by this worker
    #[serde(default = "default_partitions")]
    pub partitions: Vec<u32>,

    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,

    #[serde(default = "default_alerts_topic")]
    pub alerts_topic: String,

    /// How long one poll waits for a record
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    /// Delivery timeout of one produced record
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Extra librdkafka settings applied to both clients
    #[serde(default)]
    pub extra_config: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            group_id: default_group_id(),
            input_topic: default_input_topic(),
            partitions: default_partitions(),
            metrics_topic: default_metrics_topic(),
            alerts_topic: default_alerts_topic(),
            poll_timeout_ms: default_poll_timeout(),
            send_timeout_ms: default_send_timeout(),
            extra_config: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment =
            Figment::from(Serialized::default("kafka", KafkaConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: KafkaConfig = figment
            .merge(Env::prefixed("ANALYTICS_").split("__"))
            .extract_inner("kafka")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(ProcessorError::Configuration {
                source: "kafka brokers must not be empty".into(),
            });
        }
        if self.partitions.is_empty() {
            return Err(ProcessorError::Configuration {
                source: "kafka partitions must list at least one partition".into(),
            });
        }
        if self.poll_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(ProcessorError::Configuration {
                source: "kafka timeouts must be greater than 0".into(),
            });
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "stream-analytics-engine".to_string()
}

fn default_input_topic() -> String {
    "website-analytics-events".to_string()
}

fn default_partitions() -> Vec<u32> {
    vec![0]
}

fn default_metrics_topic() -> String {
    "processed-metrics".to_string()
}

fn default_alerts_topic() -> String {
    "cep-alerts".to_string()
}

fn default_poll_timeout() -> u64 {
    100
}

fn default_send_timeout() -> u64 {
    5000
}
