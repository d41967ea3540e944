//! Worker loop
//!
//! A [`Worker`] drives one [`AnalyticsEngine`] from an [`EventSource`]:
//!
//! 1. restore the latest checkpoint and seek the source to its offsets
//! 2. poll records, feed them to the engine and queue the outputs
//! 3. on every watermark tick, re-evaluate idle partitions
//! 4. on every checkpoint tick, snapshot the engine and persist it in the
//!    background behind a flush barrier
//! 5. commit source offsets once a checkpoint holding them is durable
//!
//! All engine mutation happens on the worker task. Only checkpoint writes and
//! sink writes run concurrently with ingestion.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::engine::{AnalyticsEngine, EngineStats};
use crate::config::{EngineConfig, RecoveryMode};
use crate::error::{DecodeError, ProcessorError, Result, SinkResult};
use crate::metrics::EngineMetrics;
use crate::sink::{AlertSink, EngineOutput, MetricSink, OutputEmitter};
use crate::source::EventSource;
use crate::state::{CheckpointCoordinator, CheckpointOutcome, CheckpointStore};

/// Pause after a poll that returned nothing
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause after a failed poll
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// Read-only view of a running worker
///
/// Refreshed on every watermark tick and checkpoint completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub started_at: Option<DateTime<Utc>>,
    /// Current engine watermark
    pub watermark: i64,
    pub last_checkpoint_id: Option<u64>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    /// Wall-clock time since the last completed checkpoint (or since start)
    pub checkpoint_lag_ms: u64,
    /// Offsets acknowledged to the source
    pub committed_offsets: BTreeMap<u32, i64>,
    pub active_windows: usize,
    pub active_windows_per_key: BTreeMap<String, usize>,
    /// Outputs queued but not yet written by the sinks
    pub pending_outputs: u64,
    pub stats: EngineStats,
}

impl WorkerStatus {
    fn lag_at(&self, now: DateTime<Utc>) -> u64 {
        self.last_checkpoint_at
            .or(self.started_at)
            .map(|since| (now - since).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Single-threaded owner of one engine, its source and its sinks
pub struct Worker<S: EventSource> {
    config: EngineConfig,
    engine: AnalyticsEngine,
    source: S,
    metric_sink: Arc<dyn MetricSink>,
    alert_sink: Arc<dyn AlertSink>,
    coordinator: CheckpointCoordinator,
    metrics: EngineMetrics,
    status: Arc<RwLock<WorkerStatus>>,
    decode_errors: Option<mpsc::Sender<DecodeError>>,
}

impl<S: EventSource + 'static> Worker<S> {
    pub fn new(
        config: EngineConfig,
        source: S,
        metric_sink: Arc<dyn MetricSink>,
        alert_sink: Arc<dyn AlertSink>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        let metrics = EngineMetrics::new();
        let engine = AnalyticsEngine::new(&config)?.with_metrics(metrics.clone());
        let coordinator = CheckpointCoordinator::new(checkpoint_store, config.checkpoint.retain);
        let status = WorkerStatus {
            worker_id: config.worker_id.clone(),
            ..Default::default()
        };

        Ok(Self {
            config,
            engine,
            source,
            metric_sink,
            alert_sink,
            coordinator,
            metrics,
            status: Arc::new(RwLock::new(status)),
            decode_errors: None,
        })
    }

    /// Forward malformed records to a bounded channel
    ///
    /// Returns the receiving end; its capacity is `buffer_size`. When the
    /// channel is full, further errors are only logged and counted.
    pub fn decode_error_channel(&mut self) -> mpsc::Receiver<DecodeError> {
        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        self.decode_errors = Some(tx);
        rx
    }

    /// Engine metrics, for registration before the worker starts
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Run the worker on a new task
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = Arc::clone(&self.status);
        let task = tokio::spawn(self.run(shutdown_rx));

        WorkerHandle {
            status,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Run until shutdown is signalled, the source is exhausted or a fatal
    /// error occurs
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            source = self.source.name(),
            checkpoint_store = %self.coordinator.store().describe(),
            "Starting worker"
        );
        self.status.write().started_at = Some(Utc::now());

        if let Err(e) = self.restore().await {
            error!(error = %e, "Worker failed to start");
            self.set_state(WorkerState::Failed);
            return Err(e);
        }

        let mut emitter = OutputEmitter::new(
            Arc::clone(&self.metric_sink),
            Arc::clone(&self.alert_sink),
            &self.config.sink,
            self.metrics.clone(),
        );

        let checkpoint_interval = self.config.checkpoint.interval();
        let mut checkpoint_ticker =
            time::interval_at(Instant::now() + checkpoint_interval, checkpoint_interval);
        checkpoint_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let watermark_interval = self.config.watermark.update_interval();
        let mut watermark_ticker =
            time::interval_at(Instant::now() + watermark_interval, watermark_interval);
        watermark_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.set_state(WorkerState::Running);
        self.refresh_status(&emitter);

        let result = loop {
            if let Some(outcome) = self.coordinator.poll_completed() {
                self.on_checkpoint_outcome(outcome, &emitter).await;
            }

            if self.source.is_exhausted() {
                info!("Source exhausted, flushing all windows");
                break self.finish_input(&mut emitter, &mut shutdown).await;
            }

            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => {
                    info!(worker_id = %self.config.worker_id, "Shutdown requested");
                    break Ok(());
                }

                _ = checkpoint_ticker.tick() => {
                    self.trigger_checkpoint(&emitter);
                }

                _ = watermark_ticker.tick() => {
                    let outputs = self.engine.on_periodic_check();
                    match emit_or_shutdown(&mut emitter, outputs, &mut shutdown).await {
                        Ok(true) => self.refresh_status(&emitter),
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e.into()),
                    }
                }

                polled = self.source.poll() => {
                    match polled {
                        Ok(Some(record)) => {
                            let outputs = match self.engine.process_record(&record) {
                                Ok(outputs) => outputs,
                                Err(decode_error) => {
                                    self.forward_decode_error(decode_error);
                                    continue;
                                }
                            };
                            match emit_or_shutdown(&mut emitter, outputs, &mut shutdown).await {
                                Ok(true) => {}
                                Ok(false) => break Ok(()),
                                Err(e) => break Err(e.into()),
                            }
                        }
                        Ok(None) => time::sleep(IDLE_POLL_INTERVAL).await,
                        Err(e) => {
                            warn!(source = self.source.name(), error = %e, "Source poll failed");
                            time::sleep(SOURCE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        };

        self.stop(emitter, result).await
    }

    async fn restore(&mut self) -> Result<()> {
        let restored = async {
            let Some((metadata, snapshot)) = self.coordinator.restore_latest().await? else {
                return Ok(None);
            };
            self.engine.restore(&snapshot)?;
            Ok::<_, ProcessorError>(Some((metadata, snapshot)))
        }
        .await;

        match restored {
            Ok(Some((metadata, snapshot))) => {
                self.source.seek(&snapshot.offsets).await?;
                let mut status = self.status.write();
                status.last_checkpoint_id = Some(metadata.checkpoint_id);
                status.last_checkpoint_at = Some(metadata.created_at);
                status.committed_offsets = snapshot.offsets;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => match self.config.checkpoint.recovery_mode {
                RecoveryMode::Strict => Err(e),
                RecoveryMode::ReplayWithoutState => {
                    warn!(
                        error = %e,
                        "Checkpoint restore failed; replaying from committed source offsets without state"
                    );
                    self.engine =
                        AnalyticsEngine::new(&self.config)?.with_metrics(self.metrics.clone());
                    Ok(())
                }
            },
        }
    }

    fn trigger_checkpoint(&mut self, emitter: &OutputEmitter) {
        if let Some(in_flight) = self.coordinator.in_flight() {
            debug!(checkpoint_id = in_flight, "Previous checkpoint still in flight, skipping barrier");
            return;
        }

        let snapshot = match self.engine.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.checkpoints_failed.inc();
                error!(error = %e, "Failed to snapshot engine state");
                return;
            }
        };

        match self.coordinator.begin(snapshot, Some(emitter.barrier())) {
            Ok(checkpoint_id) => debug!(
                checkpoint_id = checkpoint_id,
                pending_outputs = emitter.pending(),
                "Checkpoint barrier"
            ),
            Err(e) => warn!(error = %e, "Could not start checkpoint"),
        }
    }

    async fn on_checkpoint_outcome(&mut self, outcome: CheckpointOutcome, emitter: &OutputEmitter) {
        match outcome {
            CheckpointOutcome::Completed {
                checkpoint_id,
                offsets,
            } => {
                self.metrics.checkpoints_completed.inc();
                if let Err(e) = self.source.commit(&offsets).await {
                    // The next checkpoint commits newer offsets
                    warn!(checkpoint_id = checkpoint_id, error = %e, "Offset commit failed");
                } else {
                    self.status.write().committed_offsets = offsets;
                }
                {
                    let mut status = self.status.write();
                    status.last_checkpoint_id = Some(checkpoint_id);
                    status.last_checkpoint_at = Some(Utc::now());
                }
                info!(checkpoint_id = checkpoint_id, "Checkpoint completed");
            }
            CheckpointOutcome::Failed {
                checkpoint_id,
                error,
            } => {
                self.metrics.checkpoints_failed.inc();
                error!(
                    checkpoint_id = checkpoint_id,
                    error = %error,
                    "Checkpoint failed, previous checkpoint remains authoritative"
                );
            }
        }
        self.refresh_status(emitter);
    }

    /// Flush every window of a bounded input and persist the final state
    ///
    /// A shutdown request cuts the flush short; [`Worker::stop`] then bounds
    /// whatever is still pending.
    async fn finish_input(
        &mut self,
        emitter: &mut OutputEmitter,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let outputs = self.engine.finish();
        if !emit_or_shutdown(emitter, outputs, shutdown).await? {
            return Ok(());
        }

        if !self.settle_checkpoint(emitter, shutdown).await {
            return Ok(());
        }
        self.trigger_checkpoint(emitter);
        self.settle_checkpoint(emitter, shutdown).await;
        Ok(())
    }

    /// Wait for the in-flight checkpoint; false if shutdown came first
    async fn settle_checkpoint(
        &mut self,
        emitter: &OutputEmitter,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let outcome = tokio::select! {
            biased;

            outcome = self.coordinator.wait_in_flight() => outcome,
            _ = shutdown_requested(shutdown) => {
                info!(worker_id = %self.config.worker_id, "Shutdown requested during final checkpoint");
                return false;
            }
        };
        if let Some(outcome) = outcome {
            self.on_checkpoint_outcome(outcome, emitter).await;
        }
        true
    }

    /// Settle the in-flight checkpoint and drain the sinks within
    /// `shutdown_timeout_ms`
    ///
    /// Past the deadline the checkpoint is aborted and reported as failed,
    /// and undelivered outputs are abandoned. Their offsets were never
    /// committed, so a restart replays them.
    async fn stop(mut self, emitter: OutputEmitter, result: Result<()>) -> Result<()> {
        self.set_state(WorkerState::Stopping);
        let deadline = Instant::now() + self.config.shutdown_timeout();

        let outcome = match time::timeout_at(deadline, self.coordinator.wait_in_flight()).await {
            Ok(outcome) => outcome,
            Err(_) => self.coordinator.abort_in_flight(),
        };
        if let Some(outcome) = outcome {
            self.on_checkpoint_outcome(outcome, &emitter).await;
        }

        self.refresh_status(&emitter);
        let drained = emitter
            .close(deadline.saturating_duration_since(Instant::now()))
            .await;
        self.status.write().pending_outputs = 0;

        let result = result.and(drained.map_err(ProcessorError::from));
        match &result {
            Ok(()) => {
                self.set_state(WorkerState::Stopped);
                info!(
                    worker_id = %self.config.worker_id,
                    stats = ?self.engine.stats(),
                    "Worker stopped"
                );
            }
            Err(e) => {
                self.set_state(WorkerState::Failed);
                error!(worker_id = %self.config.worker_id, error = %e, "Worker failed");
            }
        }
        result
    }

    fn forward_decode_error(&self, decode_error: DecodeError) {
        let Some(tx) = &self.decode_errors else {
            return;
        };
        if let Err(e) = tx.try_send(decode_error) {
            debug!(error = %e, "Decode error channel unavailable");
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.status.write().state = state;
        debug!(worker_id = %self.config.worker_id, state = %state, "Worker state changed");
    }

    fn refresh_status(&self, emitter: &OutputEmitter) {
        let mut status = self.status.write();
        status.watermark = self.engine.current_watermark().timestamp;
        status.active_windows = self.engine.active_windows();
        status.active_windows_per_key = self.engine.active_windows_per_key();
        status.pending_outputs = emitter.pending();
        status.stats = self.engine.stats().clone();

        let lag = status.lag_at(Utc::now());
        status.checkpoint_lag_ms = lag;
        self.metrics.checkpoint_lag_ms.set(lag as i64);
    }
}

/// Resolves once shutdown is requested or the handle is dropped
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Queue outputs unless shutdown is requested while the queue is full
///
/// Returns `Ok(false)` when interrupted; the outputs not yet queued are
/// dropped.
async fn emit_or_shutdown(
    emitter: &mut OutputEmitter,
    outputs: Vec<EngineOutput>,
    shutdown: &mut watch::Receiver<bool>,
) -> SinkResult<bool> {
    tokio::select! {
        biased;

        emitted = emitter.emit_all(outputs) => emitted.map(|()| true),
        _ = shutdown_requested(shutdown) => {
            warn!(pending = emitter.pending(), "Shutdown requested while sinks are backpressured");
            Ok(false)
        }
    }
}

/// Control handle of a spawned worker
pub struct WorkerHandle {
    status: Arc<RwLock<WorkerStatus>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Current status, with the checkpoint lag computed now
    pub fn status(&self) -> WorkerStatus {
        let mut status = self.status.read().clone();
        if matches!(status.state, WorkerState::Running | WorkerState::Starting) {
            status.checkpoint_lag_ms = status.lag_at(Utc::now());
        }
        status
    }

    /// Ask the worker to stop intake and exit
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to exit
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| ProcessorError::Execution {
            source: Box::new(e),
        })?
    }

    /// Signal shutdown and wait for the worker to exit
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.join().await
    }
}
