//! Historical catch-up from the checkpoint to the chain head.
//!
//! One invocation observes the head once, then walks `[checkpoint + 1, head]`
//! in inclusive batches of `batch_size` blocks. Each batch is queried,
//! decoded and upserted event by event; the checkpoint moves to the batch's
//! upper bound only after every upsert of the batch returned. A sink failure
//! aborts the invocation with the checkpoint still at the previous batch, so
//! the next invocation replays the failed batch in full.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opindex_core::checkpoint::CheckpointManager;
use opindex_core::client::ChainClient;
use opindex_core::error::IndexerError;
use opindex_core::metrics::IndexerMetrics;
use opindex_core::sink::{EventSink, UpsertOutcome};

use crate::decoder::UserOperationDecoder;

/// Summary of one backfill invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    /// First block considered.
    pub from: u64,
    /// Head (minus confirmation depth) observed at the start.
    pub target: u64,
    pub batches: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub decode_errors: u64,
    /// Stopped early because shutdown was requested.
    pub cancelled: bool,
}

pub struct BackfillRunner {
    checkpoint: CheckpointManager,
    decoder: Arc<UserOperationDecoder>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<IndexerMetrics>,
    start_block: u64,
    batch_size: u64,
    confirmation_depth: u64,
}

impl BackfillRunner {
    pub fn new(
        checkpoint: CheckpointManager,
        decoder: Arc<UserOperationDecoder>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            checkpoint,
            decoder,
            sink,
            metrics,
            start_block: 0,
            batch_size: 1000,
            confirmation_depth: 0,
        }
    }

    /// First block to index when no checkpoint exists.
    pub fn start_block(mut self, block: u64) -> Self {
        self.start_block = block;
        self
    }

    pub fn batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = depth;
        self
    }

    /// Run to completion against the head observed now.
    ///
    /// `cancel` is checked between batches; a batch in flight always finishes
    /// or fails as a whole.
    pub async fn run(
        &self,
        client: &dyn ChainClient,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport, IndexerError> {
        let head = client.current_height().await?;
        let target = head.saturating_sub(self.confirmation_depth);
        let mut from = self.checkpoint.resume_from(self.start_block).await?;

        let mut report = BackfillReport {
            from,
            target,
            ..Default::default()
        };
        if from > target {
            debug!(from, target, "backfill: nothing to do");
            return Ok(report);
        }
        info!(from, target, batch_size = self.batch_size, "backfill started");

        while from <= target {
            if cancel.is_cancelled() {
                info!(next = from, "backfill cancelled");
                report.cancelled = true;
                return Ok(report);
            }

            let to = from.saturating_add(self.batch_size - 1).min(target);
            self.run_batch(client, from, to, &mut report).await?;
            self.checkpoint.set(to).await?;
            self.metrics.record_batch();
            report.batches += 1;
            debug!(from, to, "batch committed");

            match to.checked_add(1) {
                Some(next) => from = next,
                None => break,
            }
        }

        info!(
            target,
            batches = report.batches,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "backfill complete"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        client: &dyn ChainClient,
        from: u64,
        to: u64,
        report: &mut BackfillReport,
    ) -> Result<(), IndexerError> {
        let logs = client.query_range(from, to).await?;

        for log in &logs {
            let event = match self.decoder.decode(log, Utc::now()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(from, to, tx_hash = ?log.tx_hash, error = %e, "skipping undecodable log");
                    self.metrics.record_decode_error();
                    report.decode_errors += 1;
                    continue;
                }
            };

            let outcome = self.sink.upsert(&event).await.map_err(|e| {
                self.metrics.record_sink_error();
                warn!(
                    from,
                    to,
                    tx_hash = %event.transaction_hash,
                    log_index = event.log_index,
                    error = %e,
                    "upsert failed; batch will be replayed"
                );
                e
            })?;
            self.metrics.record_upsert(outcome);
            match outcome {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::AlreadyPresent => report.duplicates += 1,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{user_op_log, FlakySink, MockChain};
    use opindex_core::checkpoint::MemoryCheckpointStore;
    use opindex_core::query::UserOpFilter;
    use opindex_core::sink::EventQuery;
    use opindex_core::DEFAULT_ENTRYPOINT;
    use opindex_storage::InMemoryStorage;

    fn runner(sink: Arc<dyn EventSink>, checkpoint: CheckpointManager) -> BackfillRunner {
        BackfillRunner::new(
            checkpoint,
            Arc::new(UserOperationDecoder::new(DEFAULT_ENTRYPOINT).unwrap()),
            sink,
            Arc::new(IndexerMetrics::global("test")),
        )
    }

    fn checkpoint() -> CheckpointManager {
        CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()), "test")
    }

    #[tokio::test]
    async fn checkpoint_at_head_performs_no_queries() {
        let chain = MockChain::new(100);
        let cp = checkpoint();
        cp.set(100).await.unwrap();

        let store = Arc::new(InMemoryStorage::new());
        let report = runner(store, cp.clone())
            .batch_size(1000)
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(chain.queries().is_empty());
        assert_eq!(report.batches, 0);
        assert_eq!(cp.get().await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn covers_every_block_after_checkpoint_exactly_once() {
        let chain = MockChain::new(2_500);
        for (block, tx) in [(1_000, 1), (1_001, 2), (1_999, 3), (2_000, 4), (2_500, 5)] {
            chain.add_log(user_op_log(block, tx, 0));
        }
        let cp = checkpoint();
        cp.set(1_000).await.unwrap();

        let store = Arc::new(InMemoryStorage::new());
        let report = runner(store.clone(), cp.clone())
            .batch_size(1000)
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            chain.queries(),
            vec![(1_001, 2_000), (2_001, 2_500)]
        );
        assert_eq!(report.inserted, 4);
        assert_eq!(store.event_count(), 4);
        let blocks: Vec<u64> = store.events().iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![1_001, 1_999, 2_000, 2_500]);
        assert_eq!(cp.get().await.unwrap(), Some(2_500));
    }

    #[tokio::test]
    async fn starts_at_start_block_without_checkpoint() {
        let chain = MockChain::new(12);
        chain.add_log(user_op_log(9, 1, 0));
        chain.add_log(user_op_log(10, 2, 0));

        let store = Arc::new(InMemoryStorage::new());
        let cp = checkpoint();
        runner(store.clone(), cp.clone())
            .start_block(10)
            .batch_size(2)
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(chain.queries(), vec![(10, 11), (12, 12)]);
        assert_eq!(store.event_count(), 1);
        assert_eq!(cp.get().await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn sink_failure_keeps_checkpoint_and_replay_succeeds() {
        let chain = MockChain::new(50);
        for i in 0..5 {
            chain.add_log(user_op_log(42, 100 + i, i));
        }
        let cp = checkpoint();
        cp.set(40).await.unwrap();

        let sink = Arc::new(FlakySink::new(InMemoryStorage::new(), 3));
        let run = runner(sink.clone(), cp.clone()).batch_size(1000);

        let err = run
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(cp.get().await.unwrap(), Some(40));
        assert_eq!(sink.inner().event_count(), 2);

        let report = run
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.inserted, 3);
        assert_eq!(sink.inner().event_count(), 5);
        assert_eq!(cp.get().await.unwrap(), Some(50));
        assert_eq!(chain.queries(), vec![(41, 50), (41, 50)]);
    }

    #[tokio::test]
    async fn undecodable_logs_are_skipped() {
        let chain = MockChain::new(5);
        let mut bad = user_op_log(3, 1, 0);
        bad.data = "0xdead".into();
        chain.add_log(bad);
        chain.add_log(user_op_log(4, 2, 0));

        let store = Arc::new(InMemoryStorage::new());
        let cp = checkpoint();
        let report = runner(store.clone(), cp.clone())
            .start_block(1)
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.decode_errors, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(cp.get().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let chain = MockChain::new(20);
        chain.add_log(user_op_log(15, 1, 0));
        chain.add_log(user_op_log(15, 1, 1));

        let store = Arc::new(InMemoryStorage::new());
        // Separate checkpoints: both runs cover the same range.
        for _ in 0..2 {
            runner(store.clone(), checkpoint())
                .start_block(10)
                .run(chain.as_ref(), &CancellationToken::new())
                .await
                .unwrap();
        }
        let all = store.find(&UserOpFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn confirmation_depth_trims_target() {
        let chain = MockChain::new(100);
        let cp = checkpoint();
        let report = runner(Arc::new(InMemoryStorage::new()), cp.clone())
            .start_block(90)
            .confirmation_depth(5)
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.target, 95);
        assert_eq!(chain.queries(), vec![(90, 95)]);
    }

    #[tokio::test]
    async fn cancelled_before_first_batch() {
        let chain = MockChain::new(100);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let cp = checkpoint();
        let report = runner(Arc::new(InMemoryStorage::new()), cp.clone())
            .start_block(1)
            .run(chain.as_ref(), &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(chain.queries().is_empty());
        assert_eq!(cp.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_during_batch_commits_that_batch_then_stops() {
        let chain = MockChain::new(50);
        chain.add_log(user_op_log(5, 1, 0));
        chain.add_log(user_op_log(15, 2, 0));
        chain.hold_next_query();

        let store = Arc::new(InMemoryStorage::new());
        let cp = checkpoint();
        let run = Arc::new(runner(store.clone(), cp.clone()).start_block(1).batch_size(10));
        let cancel = CancellationToken::new();

        let task = {
            let (chain, run, cancel) = (chain.clone(), run.clone(), cancel.clone());
            tokio::spawn(async move { run.run(chain.as_ref(), &cancel).await })
        };

        chain.query_entered().await;
        cancel.cancel();
        assert_eq!(cp.get().await.unwrap(), None);
        chain.release_query();

        let report = task.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.batches, 1);
        assert_eq!(chain.queries(), vec![(1, 10)]);
        assert_eq!(cp.get().await.unwrap(), Some(10));
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn head_failure_is_transient() {
        let chain = MockChain::new(10);
        chain.fail_height(1);
        let err = runner(Arc::new(InMemoryStorage::new()), checkpoint())
            .run(chain.as_ref(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
