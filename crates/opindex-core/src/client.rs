//! Chain client abstraction.
//!
//! A [`ChainClient`] answers head-height and ranged log queries and opens live
//! log subscriptions. It never retries; retry timing belongs to the
//! orchestrator. A [`ChainClientFactory`] builds a fresh client for every
//! connection attempt; a client that saw an error is never reused.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;
use crate::types::RawLog;

/// Remote chain endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number known to the provider.
    async fn current_height(&self) -> Result<u64, IndexerError>;

    /// All logs of the watched contract in blocks `from..=to`.
    ///
    /// Fails with [`IndexerError::InvalidRange`] when `from > to`.
    async fn query_range(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError>;

    /// Open a live subscription to newly mined logs.
    async fn subscribe(&self) -> Result<LogSubscription, IndexerError>;
}

/// Builds a new [`ChainClient`]; called on every (re)connect.
#[async_trait]
pub trait ChainClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, IndexerError>;
}

/// Reject an inverted block range.
pub fn check_range(from: u64, to: u64) -> Result<(), IndexerError> {
    if from > to {
        return Err(IndexerError::InvalidRange { from, to });
    }
    Ok(())
}

// ─── Subscription channel ─────────────────────────────────────────────────────

/// Item yielded by [`LogSubscription::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItem {
    Log(RawLog),
    /// The underlying connection is gone. Fired at most once.
    Lost(String),
    /// Unsubscribed locally, or the producer finished.
    Closed,
}

/// Consumer half of a live log subscription.
///
/// Logs arrive on a bounded channel; connection loss arrives on a one-shot
/// side channel. Dropping the subscription unsubscribes it.
pub struct LogSubscription {
    logs: mpsc::Receiver<RawLog>,
    lost: Option<oneshot::Receiver<String>>,
    token: CancellationToken,
}

impl LogSubscription {
    /// Wait for the next log or lifecycle signal.
    ///
    /// A pending connection-loss signal wins over buffered logs; whatever was
    /// buffered is covered by the next backfill.
    pub async fn next(&mut self) -> SubscriptionItem {
        if self.token.is_cancelled() {
            return SubscriptionItem::Closed;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => SubscriptionItem::Closed,
            reason = recv_lost(&mut self.lost) => {
                self.lost = None;
                SubscriptionItem::Lost(reason.unwrap_or_else(|_| "subscription feed dropped".into()))
            }
            log = self.logs.recv() => match log {
                Some(log) => SubscriptionItem::Log(log),
                None => SubscriptionItem::Closed,
            },
        }
    }

    /// A cloneable handle that can end this subscription from another task.
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            token: self.token.clone(),
        }
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn recv_lost(
    lost: &mut Option<oneshot::Receiver<String>>,
) -> Result<String, oneshot::error::RecvError> {
    match lost {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

/// Ends a subscription. Idempotent.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Producer half of a live log subscription, held by the transport task.
pub struct SubscriptionFeed {
    logs: mpsc::Sender<RawLog>,
    lost: Option<oneshot::Sender<String>>,
    token: CancellationToken,
}

impl SubscriptionFeed {
    /// Push one log. Returns `false` once the consumer is gone or unsubscribed.
    pub async fn deliver(&self, log: RawLog) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.logs.send(log) => sent.is_ok(),
        }
    }

    /// Fire the disconnect signal. Only the first call has an effect.
    pub fn connection_lost(&mut self, reason: impl Into<String>) {
        if let Some(tx) = self.lost.take() {
            let _ = tx.send(reason.into());
        }
    }

    /// Resolves when the consumer unsubscribes or drops its half.
    pub async fn unsubscribed(&self) {
        self.token.cancelled().await
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Create a connected subscription pair with a log buffer of `capacity`.
pub fn channel(capacity: usize) -> (LogSubscription, SubscriptionFeed) {
    let (logs_tx, logs_rx) = mpsc::channel(capacity.max(1));
    let (lost_tx, lost_rx) = oneshot::channel();
    let token = CancellationToken::new();
    (
        LogSubscription {
            logs: logs_rx,
            lost: Some(lost_rx),
            token: token.clone(),
        },
        SubscriptionFeed {
            logs: logs_tx,
            lost: Some(lost_tx),
            token,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(n: u64) -> RawLog {
        RawLog {
            address: "0x00".into(),
            topics: vec![],
            data: "0x".into(),
            block_number: Some(format!("0x{n:x}")),
            block_hash: None,
            tx_hash: Some("0xaa".into()),
            log_index: Some("0x0".into()),
            removed: None,
        }
    }

    #[tokio::test]
    async fn delivers_logs_in_order() {
        let (mut sub, feed) = channel(8);
        assert!(feed.deliver(log(1)).await);
        assert!(feed.deliver(log(2)).await);

        assert_eq!(sub.next().await, SubscriptionItem::Log(log(1)));
        assert_eq!(sub.next().await, SubscriptionItem::Log(log(2)));
    }

    #[tokio::test]
    async fn connection_lost_fires_once() {
        let (mut sub, mut feed) = channel(8);
        feed.connection_lost("socket closed");
        feed.connection_lost("again");

        assert_eq!(sub.next().await, SubscriptionItem::Lost("socket closed".into()));
        drop(feed);
        assert_eq!(sub.next().await, SubscriptionItem::Closed);
    }

    #[tokio::test]
    async fn dropped_feed_reports_lost() {
        let (mut sub, feed) = channel(8);
        drop(feed);
        assert!(matches!(sub.next().await, SubscriptionItem::Lost(_)));
        assert_eq!(sub.next().await, SubscriptionItem::Closed);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (mut sub, feed) = channel(8);
        let handle = sub.handle();
        handle.unsubscribe();
        handle.unsubscribe();
        sub.unsubscribe();

        assert!(handle.is_unsubscribed());
        assert!(feed.is_unsubscribed());
        assert_eq!(sub.next().await, SubscriptionItem::Closed);
        assert!(!feed.deliver(log(1)).await);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes_feed() {
        let (sub, feed) = channel(8);
        drop(sub);
        feed.unsubscribed().await;
        assert!(feed.is_unsubscribed());
    }

    #[test]
    fn range_check() {
        assert!(check_range(5, 5).is_ok());
        assert!(matches!(
            check_range(6, 5),
            Err(IndexerError::InvalidRange { from: 6, to: 5 })
        ));
    }
}
