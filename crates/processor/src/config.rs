//! Configuration types for the stream analytics engine
//!
//! This module provides configuration structures for all engine components:
//! watermarks, metric definitions (window + key + aggregate), patterns,
//! checkpoints and sinks. Configuration is layered with figment: built-in
//! defaults, then an optional YAML file, then `ANALYTICS_`-prefixed
//! environment variables (`__` separates nested keys, e.g.
//! `ANALYTICS_CHECKPOINT__INTERVAL_MS=5000`).

use crate::aggregation::AggregateFunction;
use crate::error::{ProcessorError, Result};
use crate::watermark::BoundedOutOfOrdernessConfig;
use crate::window::{
    SessionWindowAssigner, SlidingWindowAssigner, TumblingWindowAssigner, WindowAssigner,
    WindowType,
};
use analytics_types::{AnalyticsEvent, EventType};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identifier of this worker, used in logs and status
    #[serde(default = "default_worker_id")]
    pub worker_id: String,

    /// Watermark configuration
    #[serde(default)]
    pub watermark: WatermarkConfig,

    /// Metric definitions evaluated by the windowing pipeline
    #[serde(default = "default_metric_catalog")]
    pub metrics: Vec<MetricDefinition>,

    /// Pattern matcher configuration
    #[serde(default)]
    pub patterns: PatternConfig,

    /// Checkpoint configuration
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Sink delivery configuration
    #[serde(default)]
    pub sink: SinkConfig,

    /// Capacity of the decode error channel
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// How long a stopping worker waits for its in-flight checkpoint and
    /// queued outputs before abandoning them
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            watermark: WatermarkConfig::default(),
            metrics: default_metric_catalog(),
            patterns: PatternConfig::default(),
            checkpoint: CheckpointConfig::default(),
            sink: SinkConfig::default(),
            buffer_size: default_buffer_size(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional YAML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: EngineConfig = figment
            .merge(Env::prefixed("ANALYTICS_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_id.trim().is_empty() {
            return Err(ProcessorError::Configuration {
                source: "worker_id must not be empty".into(),
            });
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(ProcessorError::Configuration {
                source: "shutdown_timeout_ms must be greater than 0".into(),
            });
        }

        self.watermark.validate()?;
        self.patterns.validate()?;
        self.checkpoint.validate()?;
        self.sink.validate()?;

        let mut names = HashSet::new();
        for definition in &self.metrics {
            definition.validate()?;
            if !names.insert(definition.name.as_str()) {
                return Err(ProcessorError::Configuration {
                    source: format!("duplicate metric definition '{}'", definition.name).into(),
                });
            }
        }

        if self.buffer_size == 0 {
            return Err(ProcessorError::Configuration {
                source: "buffer_size must be greater than 0".into(),
            });
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Watermark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Maximum expected out-of-orderness in milliseconds
    #[serde(default = "default_max_out_of_orderness")]
    pub max_out_of_orderness_ms: u64,

    /// Partition idle timeout in milliseconds (None disables idle detection)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: Option<u64>,

    /// Interval of the periodic idle check in milliseconds
    #[serde(default = "default_watermark_interval")]
    pub update_interval_ms: u64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            max_out_of_orderness_ms: default_max_out_of_orderness(),
            idle_timeout_ms: default_idle_timeout(),
            update_interval_ms: default_watermark_interval(),
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_ms == 0 {
            return Err(ProcessorError::Configuration {
                source: "watermark update_interval_ms must be greater than 0".into(),
            });
        }

        if self.idle_timeout_ms == Some(0) {
            return Err(ProcessorError::Configuration {
                source: "watermark idle_timeout_ms must be greater than 0".into(),
            });
        }

        Ok(())
    }

    pub fn generator_config(&self) -> BoundedOutOfOrdernessConfig {
        BoundedOutOfOrdernessConfig {
            max_out_of_orderness: Duration::from_millis(self.max_out_of_orderness_ms),
            idle_timeout: self.idle_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

/// Window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Type of window
    pub window_type: WindowType,

    /// Window size in milliseconds (for tumbling/sliding windows)
    #[serde(default)]
    pub size_ms: Option<u64>,

    /// Slide interval in milliseconds (for sliding windows)
    #[serde(default)]
    pub slide_ms: Option<u64>,

    /// Session gap in milliseconds (for session windows)
    #[serde(default)]
    pub gap_ms: Option<u64>,

    /// Allowed lateness for late events (milliseconds)
    #[serde(default)]
    pub allowed_lateness_ms: u64,
}

impl WindowConfig {
    pub fn tumbling(size_ms: u64) -> Self {
        Self {
            window_type: WindowType::Tumbling,
            size_ms: Some(size_ms),
            slide_ms: None,
            gap_ms: None,
            allowed_lateness_ms: 0,
        }
    }

    pub fn sliding(size_ms: u64, slide_ms: u64) -> Self {
        Self {
            window_type: WindowType::Sliding,
            size_ms: Some(size_ms),
            slide_ms: Some(slide_ms),
            gap_ms: None,
            allowed_lateness_ms: 0,
        }
    }

    pub fn session(gap_ms: u64) -> Self {
        Self {
            window_type: WindowType::Session,
            size_ms: None,
            slide_ms: None,
            gap_ms: Some(gap_ms),
            allowed_lateness_ms: 0,
        }
    }

    pub fn with_allowed_lateness(mut self, allowed_lateness_ms: u64) -> Self {
        self.allowed_lateness_ms = allowed_lateness_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.window_type {
            WindowType::Tumbling => {
                let size = self.size_ms.ok_or_else(|| ProcessorError::Configuration {
                    source: "tumbling window requires size_ms".into(),
                })?;
                if size == 0 {
                    return Err(ProcessorError::Configuration {
                        source: "tumbling window size must be greater than 0".into(),
                    });
                }
            }
            WindowType::Sliding => {
                let size = self.size_ms.ok_or_else(|| ProcessorError::Configuration {
                    source: "sliding window requires size_ms".into(),
                })?;
                let slide = self.slide_ms.ok_or_else(|| ProcessorError::Configuration {
                    source: "sliding window requires slide_ms".into(),
                })?;

                if size == 0 {
                    return Err(ProcessorError::Configuration {
                        source: "sliding window size must be greater than 0".into(),
                    });
                }

                if slide == 0 || slide > size {
                    return Err(ProcessorError::Configuration {
                        source: "slide_ms must be greater than 0 and at most size_ms".into(),
                    });
                }
            }
            WindowType::Session => {
                let gap = self.gap_ms.ok_or_else(|| ProcessorError::Configuration {
                    source: "session window requires gap_ms".into(),
                })?;
                if gap == 0 {
                    return Err(ProcessorError::Configuration {
                        source: "session gap must be greater than 0".into(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Build the window assigner described by this configuration
    pub fn assigner(&self) -> Result<Box<dyn WindowAssigner>> {
        self.validate()?;
        let assigner: Box<dyn WindowAssigner> = match self.window_type {
            WindowType::Tumbling => Box::new(TumblingWindowAssigner::new(
                self.size_ms.unwrap_or_default() as i64,
            )?),
            WindowType::Sliding => Box::new(SlidingWindowAssigner::new(
                self.size_ms.unwrap_or_default() as i64,
                self.slide_ms.unwrap_or_default() as i64,
            )?),
            WindowType::Session => Box::new(SessionWindowAssigner::new(
                self.gap_ms.unwrap_or_default() as i64,
            )?),
        };
        Ok(assigner)
    }
}

/// Which attribute of an event groups it into windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelector {
    /// One window stream for all events
    Global,
    /// Per user identifier
    User,
    /// Per session identifier; events without one are skipped
    Session,
}

/// Key used for globally keyed windows
pub const GLOBAL_KEY: &str = "global";

impl KeySelector {
    pub fn select(&self, event: &AnalyticsEvent) -> Option<String> {
        match self {
            KeySelector::Global => Some(GLOBAL_KEY.to_string()),
            KeySelector::User => Some(event.key.clone()),
            KeySelector::Session => event.session_id.clone().filter(|s| !s.is_empty()),
        }
    }

    /// Dimension name the key is reported under
    pub fn dimension(&self) -> Option<&'static str> {
        match self {
            KeySelector::Global => None,
            KeySelector::User => Some("user_id"),
            KeySelector::Session => Some("session_id"),
        }
    }
}

/// One windowed metric: which events, how they are windowed and keyed, and
/// how the window state becomes a value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Metric type written on every record
    pub name: String,

    /// Prefix of the deterministic metric id
    pub id_prefix: String,

    pub window: WindowConfig,

    pub key_by: KeySelector,

    /// Event types fed into the window (empty means all)
    #[serde(default)]
    pub event_types: Vec<EventType>,

    pub aggregate: AggregateFunction,

    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl MetricDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.id_prefix.trim().is_empty() {
            return Err(ProcessorError::Configuration {
                source: "metric definitions require a name and an id_prefix".into(),
            });
        }
        self.window.validate().map_err(|e| ProcessorError::Configuration {
            source: format!("metric '{}': {}", self.name, e).into(),
        })
    }

    pub fn accepts(&self, event_type: EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event_type)
    }

    /// Deterministic metric id for a window of this definition
    pub fn metric_id(&self, key: &str, window_start: i64) -> String {
        match self.key_by {
            KeySelector::Global => format!("{}_{}", self.id_prefix, window_start),
            _ => format!("{}_{}_{}", self.id_prefix, key, window_start),
        }
    }
}

/// Pattern matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default)]
    pub bounce: BounceConfig,

    #[serde(default)]
    pub high_activity: HighActivityConfig,

    /// Maximum buffered events per key; oldest are evicted first and the
    /// intervals they belonged to raise no alerts
    #[serde(default = "default_max_buffer_events")]
    pub max_buffer_events: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            bounce: BounceConfig::default(),
            high_activity: HighActivityConfig::default(),
            max_buffer_events: default_max_buffer_events(),
        }
    }
}

impl PatternConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bounce.enabled && self.bounce.horizon_ms == 0 {
            return Err(ProcessorError::Configuration {
                source: "bounce horizon_ms must be greater than 0".into(),
            });
        }

        if self.high_activity.enabled {
            if self.high_activity.horizon_ms == 0 {
                return Err(ProcessorError::Configuration {
                    source: "high_activity horizon_ms must be greater than 0".into(),
                });
            }
            if self.high_activity.threshold == 0 {
                return Err(ProcessorError::Configuration {
                    source: "high_activity threshold must be greater than 0".into(),
                });
            }
        }

        if self.max_buffer_events == 0 {
            return Err(ProcessorError::Configuration {
                source: "max_buffer_events must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Single-page-view (bounce) detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BounceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bounce_horizon")]
    pub horizon_ms: u64,

    #[serde(default = "default_bounce_prefix")]
    pub id_prefix: String,
}

impl Default for BounceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_ms: default_bounce_horizon(),
            id_prefix: default_bounce_prefix(),
        }
    }
}

/// Burst of page views from one key within an interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighActivityConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_activity_horizon")]
    pub horizon_ms: u64,

    /// Page views in one interval that trigger the alert
    #[serde(default = "default_activity_threshold")]
    pub threshold: u64,

    #[serde(default = "default_activity_prefix")]
    pub id_prefix: String,
}

impl Default for HighActivityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            horizon_ms: default_activity_horizon(),
            threshold: default_activity_threshold(),
            id_prefix: default_activity_prefix(),
        }
    }
}

/// What to do when the latest checkpoint cannot be restored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Abort startup
    Strict,
    /// Start with empty state from the source's committed offsets
    ReplayWithoutState,
}

impl Default for RecoveryMode {
    fn default() -> Self {
        RecoveryMode::Strict
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Interval between checkpoint barriers in milliseconds
    #[serde(default = "default_checkpoint_interval")]
    pub interval_ms: u64,

    /// Directory for file checkpoints
    #[serde(default = "default_checkpoint_dir")]
    pub directory: PathBuf,

    #[serde(default)]
    pub recovery_mode: RecoveryMode,

    /// Number of completed checkpoints kept on disk
    #[serde(default = "default_retain")]
    pub retain: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_checkpoint_interval(),
            directory: default_checkpoint_dir(),
            recovery_mode: RecoveryMode::default(),
            retain: default_retain(),
        }
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(ProcessorError::Configuration {
                source: "checkpoint interval_ms must be greater than 0".into(),
            });
        }

        if self.retain == 0 {
            return Err(ProcessorError::Configuration {
                source: "checkpoint retain must be at least 1".into(),
            });
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Sink delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Retries before a write failure is escalated to an error log
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Capacity of the bounded output queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_backoff_ms == 0 || self.max_backoff_ms < self.base_backoff_ms {
            return Err(ProcessorError::Configuration {
                source: "sink backoff requires 0 < base_backoff_ms <= max_backoff_ms".into(),
            });
        }

        if self.queue_capacity == 0 {
            return Err(ProcessorError::Configuration {
                source: "sink queue_capacity must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Metric catalog of the web analytics pipeline
pub fn default_metric_catalog() -> Vec<MetricDefinition> {
    let real_time = BTreeMap::from([("metric".to_string(), "real_time".to_string())]);

    vec![
        MetricDefinition {
            name: "PAGE_VIEWS_PER_SECOND".to_string(),
            id_prefix: "page_views_per_second".to_string(),
            window: WindowConfig::tumbling(5_000),
            key_by: KeySelector::Global,
            event_types: vec![EventType::PageView],
            aggregate: AggregateFunction::RatePerSecond,
            dimensions: real_time.clone(),
            tags: vec!["real_time".to_string(), "page_views".to_string()],
        },
        MetricDefinition {
            name: "ACTIVE_USERS".to_string(),
            id_prefix: "active_users".to_string(),
            window: WindowConfig::tumbling(5_000),
            key_by: KeySelector::Global,
            event_types: vec![EventType::SessionStart],
            aggregate: AggregateFunction::Count,
            dimensions: real_time,
            tags: vec!["real_time".to_string(), "users".to_string()],
        },
        MetricDefinition {
            name: "CONVERSION_RATE".to_string(),
            id_prefix: "conversion_rate".to_string(),
            window: WindowConfig::sliding(60_000, 10_000),
            key_by: KeySelector::Global,
            event_types: vec![EventType::Conversion, EventType::PageView],
            aggregate: AggregateFunction::Ratio {
                numerator: EventType::Conversion,
                denominator: EventType::PageView,
            },
            dimensions: BTreeMap::from([("metric".to_string(), "business".to_string())]),
            tags: vec!["business".to_string(), "conversion".to_string()],
        },
        MetricDefinition {
            name: "AVERAGE_SESSION_DURATION".to_string(),
            id_prefix: "session_duration".to_string(),
            window: WindowConfig::session(30 * 60_000),
            key_by: KeySelector::Session,
            event_types: vec![EventType::SessionStart, EventType::SessionEnd],
            aggregate: AggregateFunction::SessionDuration,
            dimensions: BTreeMap::new(),
            tags: vec!["session".to_string(), "duration".to_string()],
        },
    ]
}

// Default value functions
fn default_worker_id() -> String {
    "worker-0".to_string()
}

fn default_buffer_size() -> usize {
    1000
}

fn default_shutdown_timeout() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_max_out_of_orderness() -> u64 {
    5_000
}

fn default_idle_timeout() -> Option<u64> {
    Some(60_000)
}

fn default_watermark_interval() -> u64 {
    1_000
}

fn default_max_buffer_events() -> usize {
    1_000
}

fn default_bounce_horizon() -> u64 {
    5 * 60_000
}

fn default_bounce_prefix() -> String {
    "high_bounce".to_string()
}

fn default_activity_horizon() -> u64 {
    60_000
}

fn default_activity_threshold() -> u64 {
    100
}

fn default_activity_prefix() -> String {
    "high_activity".to_string()
}

fn default_checkpoint_interval() -> u64 {
    10_000
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

fn default_retain() -> usize {
    1
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_queue_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.metrics.len(), 4);
        assert!(config.patterns.bounce.enabled);
        assert!(!config.patterns.high_activity.enabled);
        assert_eq!(config.checkpoint.recovery_mode, RecoveryMode::Strict);
    }

    #[test]
    fn test_window_config_validation() {
        assert!(WindowConfig::tumbling(0).validate().is_err());
        assert!(WindowConfig::sliding(10_000, 20_000).validate().is_err());
        assert!(WindowConfig::session(0).validate().is_err());

        let missing_size = WindowConfig {
            size_ms: None,
            ..WindowConfig::tumbling(1)
        };
        assert!(missing_size.validate().is_err());
    }

    #[test]
    fn test_window_config_builds_assigner() {
        let assigner = WindowConfig::sliding(60_000, 10_000).assigner().unwrap();
        assert_eq!(assigner.window_type(), WindowType::Sliding);
        assert_eq!(assigner.max_windows_per_event(), 6);

        let session = WindowConfig::session(1_000).assigner().unwrap();
        assert!(session.is_session_window());
    }

    #[test]
    fn test_duplicate_metric_names_rejected() {
        let mut config = EngineConfig::default();
        let first = config.metrics[0].clone();
        config.metrics.push(first);
        assert!(matches!(
            config.validate(),
            Err(ProcessorError::Configuration { .. })
        ));
    }

    #[test]
    fn test_metric_ids() {
        let catalog = default_metric_catalog();
        assert_eq!(
            catalog[0].metric_id(GLOBAL_KEY, 1_700_000_000_000),
            "page_views_per_second_1700000000000"
        );
        assert_eq!(catalog[3].metric_id("s1", 42), "session_duration_s1_42");
    }

    #[test]
    fn test_key_selector() {
        let event = AnalyticsEvent::new("e", 0, "u1", EventType::PageView);
        assert_eq!(KeySelector::User.select(&event).as_deref(), Some("u1"));
        assert_eq!(KeySelector::Session.select(&event), None);
        assert_eq!(
            KeySelector::Session
                .select(&event.clone().with_session("s9"))
                .as_deref(),
            Some("s9")
        );
        assert_eq!(KeySelector::Global.select(&event).as_deref(), Some(GLOBAL_KEY));
    }

    #[test]
    fn test_sink_and_checkpoint_validation() {
        let sink = SinkConfig {
            base_backoff_ms: 500,
            max_backoff_ms: 100,
            ..Default::default()
        };
        assert!(sink.validate().is_err());

        let checkpoint = CheckpointConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert!(checkpoint.validate().is_err());
    }

    #[test]
    fn test_load_merges_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(
            &path,
            r#"
worker_id: worker-7
watermark:
  max_out_of_orderness_ms: 2000
checkpoint:
  interval_ms: 2500
  recovery_mode: replay_without_state
metrics:
  - name: PAGE_VIEWS
    id_prefix: page_views
    window:
      window_type: tumbling
      size_ms: 1000
      allowed_lateness_ms: 500
    key_by: user
    event_types: [PAGE_VIEW]
    aggregate:
      function: count
"#,
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.worker_id, "worker-7");
        assert_eq!(config.watermark.max_out_of_orderness_ms, 2000);
        assert_eq!(config.watermark.update_interval_ms, 1000);
        assert_eq!(config.checkpoint.interval_ms, 2500);
        assert_eq!(
            config.checkpoint.recovery_mode,
            RecoveryMode::ReplayWithoutState
        );
        assert_eq!(config.metrics.len(), 1);
        assert_eq!(config.metrics[0].window.allowed_lateness_ms, 500);
        assert_eq!(config.metrics[0].aggregate, AggregateFunction::Count);
    }
}
