//! Live log subscription over plain HTTP using a server-side log filter.
//!
//! `eth_newFilter` installs the filter, `eth_getFilterChanges` is polled on a
//! fixed interval and `eth_uninstallFilter` removes it on unsubscribe. Any
//! failed poll (including a filter the node has expired) fires the disconnect
//! signal; the orchestrator then installs a fresh filter on a new client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use opindex_core::client::{self, LogSubscription, SubscriptionFeed};
use opindex_core::error::IndexerError;
use opindex_core::types::RawLog;

use crate::transport::RpcTransport;

/// Install a log filter and start polling it.
pub async fn subscribe(
    transport: Arc<dyn RpcTransport>,
    filter: Value,
    interval: Duration,
    capacity: usize,
) -> Result<LogSubscription, IndexerError> {
    let id = transport.call("eth_newFilter", vec![filter]).await?;
    let filter_id = id
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| IndexerError::Protocol(format!("eth_newFilter returned {id}")))?;
    debug!(filter = %filter_id, "log filter installed");

    let (sub, feed) = client::channel(capacity);
    tokio::spawn(run_poll(transport, filter_id, interval, feed));
    Ok(sub)
}

async fn run_poll(
    transport: Arc<dyn RpcTransport>,
    filter_id: String,
    interval: Duration,
    mut feed: SubscriptionFeed,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'poll: loop {
        tokio::select! {
            biased;
            _ = feed.unsubscribed() => break 'poll,
            _ = ticker.tick() => {}
        }

        let changes = match transport
            .call("eth_getFilterChanges", vec![json!(filter_id)])
            .await
        {
            Ok(changes) => changes,
            Err(e) => {
                warn!(filter = %filter_id, error = %e, "filter poll failed");
                feed.connection_lost(e.to_string());
                return;
            }
        };
        let logs: Vec<RawLog> = match serde_json::from_value(changes) {
            Ok(logs) => logs,
            Err(e) => {
                feed.connection_lost(format!("malformed eth_getFilterChanges result: {e}"));
                return;
            }
        };
        for log in logs {
            if !feed.deliver(log).await {
                break 'poll;
            }
        }
    }

    if let Err(e) = transport
        .call("eth_uninstallFilter", vec![json!(filter_id)])
        .await
    {
        debug!(filter = %filter_id, error = %e, "eth_uninstallFilter failed");
    }
}
