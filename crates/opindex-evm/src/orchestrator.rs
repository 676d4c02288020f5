//! The indexer orchestrator: subscription state machine and task supervisor.
//!
//! # Lifecycle
//! 1. Validate the configuration and check the endpoint once
//!    (`connect` + `current_height`). Failure aborts startup.
//! 2. Spawn the sink writer, and the startup backfill when a checkpoint
//!    exists or `start_block > 0`.
//! 3. Drive `Disconnected → Connecting → Subscribed`. A failed subscribe or a
//!    lost connection returns to `Disconnected` and arms the reconnect timer.
//!    Every attempt builds a new client through the factory.
//! 4. After a reconnect, or after a live upsert failure, a catch-up backfill
//!    re-reads everything above the checkpoint.
//! 5. On shutdown: drop the timers, unsubscribe, let an in-flight backfill
//!    batch finish, drain the writer, and enter `Stopped`.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use opindex_core::checkpoint::{CheckpointManager, CheckpointStore};
use opindex_core::client::{ChainClientFactory, LogSubscription, SubscriptionHandle};
use opindex_core::error::IndexerError;
use opindex_core::indexer::IndexerConfig;
use opindex_core::metrics::IndexerMetrics;
use opindex_core::sink::EventSink;
use opindex_core::state::{StateEvent, SubscriptionState};
use opindex_core::types::ChainEvent;

use crate::backfill::{BackfillReport, BackfillRunner};
use crate::decoder::UserOperationDecoder;
use crate::live::{LiveExit, LiveSubscriber};
use crate::writer::SinkWriter;

type BackfillTask = JoinHandle<Result<BackfillReport, IndexerError>>;

pub struct Orchestrator {
    config: IndexerConfig,
    factory: Arc<dyn ChainClientFactory>,
    sink: Arc<dyn EventSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    decoder: Arc<UserOperationDecoder>,
    metrics: Arc<IndexerMetrics>,
    state_tx: watch::Sender<SubscriptionState>,
    shutdown: CancellationToken,
}

/// Everything the supervisory loop owns while running.
struct Tasks {
    state: SubscriptionState,
    events_tx: mpsc::Sender<ChainEvent>,
    writer: JoinHandle<()>,
    live_handle: Option<SubscriptionHandle>,
    live_task: Option<JoinHandle<LiveExit>>,
    backfill: Option<BackfillTask>,
    /// Run another backfill as soon as the current one succeeds.
    backfill_again: bool,
    reconnect_at: Option<Instant>,
    backfill_at: Option<Instant>,
    lost_connection: bool,
}

impl Orchestrator {
    pub fn new(
        config: IndexerConfig,
        factory: Arc<dyn ChainClientFactory>,
        sink: Arc<dyn EventSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let decoder = Arc::new(UserOperationDecoder::new(&config.contract_address)?);
        let (state_tx, _) = watch::channel(SubscriptionState::Disconnected);
        let metrics = Arc::new(IndexerMetrics::global(&config.id));
        Ok(Self {
            config,
            factory,
            sink,
            checkpoints,
            decoder,
            metrics,
            state_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Observe subscription state changes.
    pub fn state(&self) -> watch::Receiver<SubscriptionState> {
        self.state_tx.subscribe()
    }

    /// Cancelling this token stops [`run`](Self::run) gracefully.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> Arc<IndexerMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Run until shutdown is requested or a fatal error occurs.
    pub async fn run(self) -> Result<(), IndexerError> {
        let head = self.check_endpoint().await?;
        let checkpoint = CheckpointManager::new(self.checkpoints.clone(), self.config.id.as_str());
        let stored = checkpoint.get().await?;
        info!(
            indexer = %self.config.id,
            contract = %self.decoder.contract(),
            head,
            checkpoint = ?stored,
            "indexer starting"
        );

        let runner = Arc::new(
            BackfillRunner::new(
                checkpoint,
                self.decoder.clone(),
                self.sink.clone(),
                self.metrics.clone(),
            )
            .start_block(self.catch_up_start(stored, head))
            .batch_size(self.config.batch_size)
            .confirmation_depth(self.config.confirmation_depth),
        );

        let sink_failed = Arc::new(Notify::new());
        let (events_tx, writer) = SinkWriter::spawn(
            self.sink.clone(),
            self.metrics.clone(),
            self.config.channel_capacity,
            sink_failed.clone(),
        );

        let mut tasks = Tasks {
            state: SubscriptionState::Disconnected,
            events_tx,
            writer,
            live_handle: None,
            live_task: None,
            backfill: None,
            backfill_again: false,
            reconnect_at: Some(Instant::now()),
            backfill_at: None,
            lost_connection: false,
        };
        if stored.is_some() || self.config.start_block > 0 {
            tasks.backfill = Some(self.spawn_backfill(&runner));
        }

        let result = self.supervise(&mut tasks, &runner, &sink_failed).await;
        self.stop(tasks).await;
        result
    }

    /// Startup reachability check. Any failure is fatal.
    async fn check_endpoint(&self) -> Result<u64, IndexerError> {
        let client = self
            .factory
            .connect()
            .await
            .map_err(|e| IndexerError::Config(format!("chain endpoint unreachable: {e}")))?;
        client
            .current_height()
            .await
            .map_err(|e| IndexerError::Config(format!("chain endpoint unreachable: {e}")))
    }

    /// Where catch-up runs resume when no checkpoint exists. A live-only
    /// indexer (`start_block == 0`) never reaches behind the startup head.
    fn catch_up_start(&self, stored: Option<u64>, head: u64) -> u64 {
        if stored.is_none() && self.config.start_block == 0 {
            head.saturating_add(1)
        } else {
            self.config.start_block
        }
    }

    async fn supervise(
        &self,
        tasks: &mut Tasks,
        runner: &Arc<BackfillRunner>,
        sink_failed: &Notify,
    ) -> Result<(), IndexerError> {
        let interval = self.config.reconnect_interval();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),

                _ = sleep_until_opt(tasks.reconnect_at) => {
                    tasks.reconnect_at = None;
                    self.transition(&mut tasks.state, StateEvent::Start)?;

                    let attempt = tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        attempt = self.connect_and_subscribe() => attempt,
                    };
                    match attempt {
                        Ok(sub) => {
                            self.transition(&mut tasks.state, StateEvent::SubscribeSucceeded)?;
                            tasks.live_handle = Some(sub.handle());
                            let live = LiveSubscriber::new(
                                self.decoder.clone(),
                                tasks.events_tx.clone(),
                                self.metrics.clone(),
                            );
                            tasks.live_task = Some(tokio::spawn(live.run(sub)));
                            if tasks.lost_connection {
                                self.metrics.record_reconnection();
                                info!("resubscribed; scheduling catch-up backfill");
                                self.request_backfill(tasks, runner);
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, retry_in_ms = interval.as_millis() as u64, "subscribe failed");
                            self.transition(&mut tasks.state, StateEvent::SubscribeFailed)?;
                            tasks.reconnect_at = Some(Instant::now() + interval);
                        }
                    }
                }

                exit = join_opt(&mut tasks.live_task) => {
                    tasks.live_task = None;
                    tasks.live_handle = None;
                    let reason = match exit {
                        Ok(LiveExit::ConnectionLost(reason)) => reason,
                        Ok(LiveExit::Unsubscribed) => "subscription closed by provider".to_string(),
                        Ok(LiveExit::WriterClosed) => {
                            return Err(IndexerError::Other("sink writer stopped".into()));
                        }
                        Err(e) => format!("live subscriber panicked: {e}"),
                    };
                    warn!(%reason, retry_in_ms = interval.as_millis() as u64, "connection lost");
                    self.transition(&mut tasks.state, StateEvent::ConnectionLost)?;
                    tasks.lost_connection = true;
                    tasks.reconnect_at = Some(Instant::now() + interval);
                }

                done = join_opt(&mut tasks.backfill) => {
                    tasks.backfill = None;
                    match flatten(done) {
                        Ok(report) => {
                            debug!(?report, "backfill finished");
                            if std::mem::take(&mut tasks.backfill_again) {
                                tasks.backfill = Some(self.spawn_backfill(runner));
                            }
                        }
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "backfill failed fatally");
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(error = %e, retry_in_ms = interval.as_millis() as u64, "backfill failed; will retry");
                            tasks.backfill_again = false;
                            tasks.backfill_at = Some(Instant::now() + interval);
                        }
                    }
                }

                _ = sleep_until_opt(tasks.backfill_at) => {
                    tasks.backfill_at = None;
                    self.request_backfill(tasks, runner);
                }

                _ = sink_failed.notified() => {
                    if tasks.backfill.is_some() {
                        tasks.backfill_again = true;
                    } else if tasks.backfill_at.is_none() {
                        tasks.backfill_at = Some(Instant::now() + interval);
                    }
                }
            }
        }
    }

    /// Build a fresh client and open a subscription on it.
    async fn connect_and_subscribe(&self) -> Result<LogSubscription, IndexerError> {
        let client = self.factory.connect().await?;
        client.subscribe().await
    }

    fn request_backfill(&self, tasks: &mut Tasks, runner: &Arc<BackfillRunner>) {
        if tasks.backfill.is_some() {
            tasks.backfill_again = true;
        } else {
            tasks.backfill = Some(self.spawn_backfill(runner));
        }
    }

    fn spawn_backfill(&self, runner: &Arc<BackfillRunner>) -> BackfillTask {
        let runner = runner.clone();
        let factory = self.factory.clone();
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            let client = factory.connect().await?;
            runner.run(client.as_ref(), &cancel).await
        })
    }

    fn transition(
        &self,
        state: &mut SubscriptionState,
        event: StateEvent,
    ) -> Result<(), IndexerError> {
        let next = state.transition(event)?;
        debug!(from = %state, to = %next, ?event, "subscription state");
        *state = next;
        self.state_tx.send_replace(next);
        Ok(())
    }

    async fn stop(&self, mut tasks: Tasks) {
        info!("indexer stopping");
        self.shutdown.cancel();

        if let Some(handle) = tasks.live_handle.take() {
            handle.unsubscribe();
        }
        if let Some(task) = tasks.live_task.take() {
            let _ = task.await;
        }
        if let Some(task) = tasks.backfill.take() {
            match flatten(task.await) {
                Ok(report) => debug!(?report, "backfill stopped"),
                Err(e) => warn!(error = %e, "backfill ended with error during shutdown"),
            }
        }

        drop(tasks.events_tx);
        if let Err(e) = tasks.writer.await {
            error!(error = %e, "sink writer panicked");
        }

        let _ = self.transition(&mut tasks.state, StateEvent::Shutdown);
        let m = self.metrics.snapshot();
        info!(
            inserted = m.events_inserted,
            duplicates = m.events_duplicate,
            decode_errors = m.decode_errors,
            sink_errors = m.sink_errors,
            batches = m.batches_committed,
            reconnections = m.reconnections,
            "indexer stopped"
        );
    }
}

// ─── select! helpers ──────────────────────────────────────────────────────────

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn join_opt<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn flatten(
    joined: Result<Result<BackfillReport, IndexerError>, JoinError>,
) -> Result<BackfillReport, IndexerError> {
    joined.map_err(|e| IndexerError::Other(format!("backfill task panicked: {e}")))?
}
