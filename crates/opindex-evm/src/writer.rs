//! Sink writer: the single consumer of the decoded live-event channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use opindex_core::metrics::IndexerMetrics;
use opindex_core::sink::EventSink;
use opindex_core::types::ChainEvent;

pub struct SinkWriter;

impl SinkWriter {
    /// Spawn the writer loop. It runs until every sender is dropped and the
    /// channel is drained.
    ///
    /// A failed upsert is logged and signalled on `failed`, so the owner can
    /// schedule a catch-up backfill that re-reads the lost event.
    pub fn spawn(
        sink: Arc<dyn EventSink>,
        metrics: Arc<IndexerMetrics>,
        capacity: usize,
        failed: Arc<Notify>,
    ) -> (mpsc::Sender<ChainEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ChainEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match sink.upsert(&event).await {
                    Ok(outcome) => {
                        metrics.record_upsert(outcome);
                        debug!(
                            block = event.block_number,
                            log_index = event.log_index,
                            ?outcome,
                            "live event written"
                        );
                    }
                    Err(e) => {
                        metrics.record_sink_error();
                        error!(
                            block = event.block_number,
                            tx_hash = %event.transaction_hash,
                            log_index = event.log_index,
                            error = %e,
                            "live upsert failed"
                        );
                        failed.notify_one();
                    }
                }
            }
            debug!("sink writer drained");
        });
        (tx, handle)
    }
}
