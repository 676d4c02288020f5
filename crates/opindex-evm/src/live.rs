//! Live subscriber: decodes subscription logs and hands them to the sink writer.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use opindex_core::client::{LogSubscription, SubscriptionItem};
use opindex_core::metrics::IndexerMetrics;
use opindex_core::types::ChainEvent;

use crate::decoder::UserOperationDecoder;

/// Why a live subscriber stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveExit {
    /// The chain client fired its disconnect signal.
    ConnectionLost(String),
    /// The subscription was ended locally.
    Unsubscribed,
    /// The sink writer is gone.
    WriterClosed,
}

pub struct LiveSubscriber {
    decoder: Arc<UserOperationDecoder>,
    events: mpsc::Sender<ChainEvent>,
    metrics: Arc<IndexerMetrics>,
}

impl LiveSubscriber {
    pub fn new(
        decoder: Arc<UserOperationDecoder>,
        events: mpsc::Sender<ChainEvent>,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            decoder,
            events,
            metrics,
        }
    }

    /// Consume `sub` until it ends. Undecodable logs are logged and skipped.
    pub async fn run(self, mut sub: LogSubscription) -> LiveExit {
        loop {
            match sub.next().await {
                SubscriptionItem::Log(log) => match self.decoder.decode(&log, Utc::now()) {
                    Ok(event) => {
                        debug!(block = event.block_number, tx_hash = %event.transaction_hash, "live event");
                        if self.events.send(event).await.is_err() {
                            return LiveExit::WriterClosed;
                        }
                    }
                    Err(e) => {
                        warn!(tx_hash = ?log.tx_hash, error = %e, "skipping undecodable live log");
                        self.metrics.record_decode_error();
                    }
                },
                SubscriptionItem::Lost(reason) => return LiveExit::ConnectionLost(reason),
                SubscriptionItem::Closed => return LiveExit::Unsubscribed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::user_op_log;
    use opindex_core::client;
    use opindex_core::DEFAULT_ENTRYPOINT;

    fn subscriber(cap: usize) -> (LiveSubscriber, mpsc::Receiver<ChainEvent>, Arc<IndexerMetrics>) {
        let (tx, rx) = mpsc::channel(cap);
        let metrics = Arc::new(IndexerMetrics::global("test"));
        let decoder = Arc::new(UserOperationDecoder::new(DEFAULT_ENTRYPOINT).unwrap());
        (LiveSubscriber::new(decoder, tx, metrics.clone()), rx, metrics)
    }

    #[tokio::test]
    async fn forwards_decoded_and_skips_bad_logs() {
        let (live, mut rx, metrics) = subscriber(8);
        let (sub, mut feed) = client::channel(8);

        let mut bad = user_op_log(7, 1, 0);
        bad.topics.truncate(1);
        feed.deliver(bad).await;
        feed.deliver(user_op_log(7, 2, 0)).await;

        let task = tokio::spawn(live.run(sub));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.block_number, 7);
        assert_eq!(event.transaction_hash, format!("0x{:064x}", 2));

        feed.connection_lost("ws closed");
        assert_eq!(task.await.unwrap(), LiveExit::ConnectionLost("ws closed".into()));
        assert_eq!(metrics.snapshot().decode_errors, 1);
    }

    #[tokio::test]
    async fn unsubscribe_ends_subscriber() {
        let (live, _rx, _) = subscriber(8);
        let (sub, _feed) = client::channel(8);
        let handle = sub.handle();

        let task = tokio::spawn(live.run(sub));
        handle.unsubscribe();
        assert_eq!(task.await.unwrap(), LiveExit::Unsubscribed);
    }

    #[tokio::test]
    async fn writer_gone_ends_subscriber() {
        let (live, rx, _) = subscriber(1);
        drop(rx);
        let (sub, feed) = client::channel(8);
        feed.deliver(user_op_log(1, 1, 0)).await;
        assert_eq!(live.run(sub).await, LiveExit::WriterClosed);
    }
}
