//! Run command - drive one engine worker

use analytics_types::{partition_for_key, EventEnvelope};
use anyhow::Context;
use clap::Args;
use processor::config::{EngineConfig, RecoveryMode};
use processor::metrics::MetricsRegistry;
use processor::pipeline::{Worker, WorkerHandle};
use processor::sink::{AlertSink, MetricSink};
use processor::source::{EventSource, MemorySource};
use processor::state::FileCheckpointStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

use crate::output::JsonLinesSink;

const DEFAULT_METRICS_TOPIC: &str = "processed-metrics";
const DEFAULT_ALERTS_TOPIC: &str = "cep-alerts";

/// Arguments of the `run` command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON-lines event file; `-` reads stdin
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    input: PathBuf,

    /// Partitions the input is spread over by user key
    #[arg(long, default_value = "1")]
    partitions: u32,

    /// Override the checkpoint directory
    #[arg(long, value_name = "DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Override the worker id
    #[arg(long)]
    worker_id: Option<String>,

    /// Start without state if the latest checkpoint cannot be restored
    #[arg(long)]
    replay_without_state: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    dump_metrics: bool,

    /// Consume from and produce to Kafka instead of files
    #[cfg(feature = "kafka")]
    #[arg(long)]
    kafka: bool,
}

impl RunArgs {
    pub async fn execute(&self, config_path: Option<&Path>) -> anyhow::Result<()> {
        let mut config = EngineConfig::load(config_path).context("invalid engine configuration")?;
        if let Some(directory) = &self.checkpoint_dir {
            config.checkpoint.directory = directory.clone();
        }
        if let Some(worker_id) = &self.worker_id {
            config.worker_id = worker_id.clone();
        }
        if self.replay_without_state {
            config.checkpoint.recovery_mode = RecoveryMode::ReplayWithoutState;
        }
        config.validate()?;

        #[cfg(feature = "kafka")]
        if self.kafka {
            return self.run_kafka(config, config_path).await;
        }

        anyhow::ensure!(self.partitions > 0, "--partitions must be at least 1");

        let reader = open_input(&self.input).await?;
        let sink = Arc::new(JsonLinesSink::stdout(DEFAULT_METRICS_TOPIC, DEFAULT_ALERTS_TOPIC));
        let source = MemorySource::new(self.partitions);
        let feeder = tokio::spawn(feed(reader, source.clone()));

        let result = run_worker(self, config, source, sink.clone(), sink).await;
        feeder.abort();
        result
    }

    #[cfg(feature = "kafka")]
    async fn run_kafka(&self, config: EngineConfig, config_path: Option<&Path>) -> anyhow::Result<()> {
        use processor::kafka::{KafkaConfig, KafkaEventSource, KafkaRecordSink};

        let kafka = KafkaConfig::load(config_path).context("invalid kafka configuration")?;
        kafka.validate()?;

        let source = KafkaEventSource::new(&kafka)?;
        let sink = Arc::new(KafkaRecordSink::new(&kafka)?);
        run_worker(self, config, source, sink.clone(), sink).await
    }
}

async fn run_worker<S: EventSource + 'static>(
    args: &RunArgs,
    config: EngineConfig,
    source: S,
    metric_sink: Arc<dyn MetricSink>,
    alert_sink: Arc<dyn AlertSink>,
) -> anyhow::Result<()> {
    let store = Arc::new(FileCheckpointStore::new(config.checkpoint.directory.clone()));
    let worker = Worker::new(config, source, metric_sink, alert_sink, store)?;

    let registry = MetricsRegistry::global();
    worker.metrics().register(&registry);

    let handle = worker.spawn();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Ctrl-C received, stopping worker"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, stopping worker"),
            }
            handle.shutdown();
        }
        _ = wait_finished(&handle) => {}
    }

    let status = handle.status();
    let result = handle.join().await;
    info!(
        state = %status.state,
        events = status.stats.events_processed,
        metrics = status.stats.metrics_emitted,
        alerts = status.stats.alerts_emitted,
        last_checkpoint = ?status.last_checkpoint_id,
        "Worker exited"
    );

    if args.dump_metrics {
        eprintln!("{}", registry.encode()?);
    }
    result.map_err(Into::into)
}

async fn wait_finished(handle: &WorkerHandle) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

type InputReader = Box<dyn AsyncRead + Unpin + Send>;

async fn open_input(input: &Path) -> anyhow::Result<InputReader> {
    if input.as_os_str() == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("cannot open {}", input.display()))?;
    Ok(Box::new(file))
}

/// Append input lines to the source, then close it
///
/// A read error ends the input early; the worker still flushes what it got.
async fn feed(reader: InputReader, source: MemorySource) {
    let mut lines = BufReader::new(reader).lines();
    let mut count = 0u64;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let partition = route(&line, source.partition_count());
                if let Err(e) = source.push(partition, line.into_bytes()) {
                    warn!(error = %e, "Dropping input line");
                    continue;
                }
                count += 1;
            }
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, records = count, "Failed to read input, closing it early");
                break;
            }
        }
    }

    source.close();
    info!(records = count, "Input complete");
}

/// Partition of a raw line by its user key; undecodable lines go to
/// partition 0 and are reported by the engine
fn route(line: &str, partitions: u32) -> u32 {
    match serde_json::from_str::<EventEnvelope>(line) {
        Ok(EventEnvelope {
            user_id: Some(user_id),
            ..
        }) => partition_for_key(&user_id, partitions),
        _ => {
            debug!("Routing undecodable line to partition 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_by_user() {
        let line = r#"{"eventId":"e1","timestamp":1,"eventType":"PAGE_VIEW","userId":"u1"}"#;
        assert_eq!(route(line, 4), partition_for_key("u1", 4));
        assert_eq!(route("not json", 4), 0);
    }

    #[tokio::test]
    async fn test_feed_routes_lines_and_closes_source() {
        let input = "{\"userId\":\"u1\"}\n\n{\"userId\":\"u2\"}\nbroken\n";
        let mut source = MemorySource::new(2);
        feed(Box::new(input.as_bytes()), source.clone()).await;

        let mut records = Vec::new();
        while let Some(record) = source.poll().await.unwrap() {
            records.push(record);
        }
        assert_eq!(records.len(), 3);
        assert!(source.is_exhausted());
        assert!(records
            .iter()
            .any(|r| r.partition == 0 && r.payload == b"broken".to_vec()));
    }
}
