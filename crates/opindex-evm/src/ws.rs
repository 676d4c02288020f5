//! Live log subscription over WebSocket (`eth_subscribe("logs", filter)`).
//!
//! [`subscribe`] connects, sends `eth_subscribe` and waits for the
//! subscription id before returning, so a returned [`LogSubscription`] is
//! known to be live. A spawned task then forwards `eth_subscription`
//! notifications until the socket fails (disconnect signal) or the consumer
//! unsubscribes (`eth_unsubscribe` + close frame).

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use opindex_core::client::{self, LogSubscription, SubscriptionFeed};
use opindex_core::error::IndexerError;
use opindex_core::types::RawLog;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RpcId, SubscriptionNotification};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_ID: u64 = 1;
const UNSUBSCRIBE_ID: u64 = 2;

/// Open a `logs` subscription on `url`.
pub async fn subscribe(
    url: &str,
    filter: Value,
    capacity: usize,
    timeout: Duration,
) -> Result<LogSubscription, IndexerError> {
    let (ws, _) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| IndexerError::Transient(format!("websocket connect to {url} timed out")))?
        .map_err(|e| IndexerError::Transient(format!("websocket connect to {url}: {e}")))?;
    info!(url, "websocket connected");

    let (mut write, mut read) = ws.split();

    let req = JsonRpcRequest::new(SUBSCRIBE_ID, "eth_subscribe", vec![json!("logs"), filter]);
    let text = serde_json::to_string(&req).map_err(|e| IndexerError::Other(e.to_string()))?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| IndexerError::Transient(format!("eth_subscribe send: {e}")))?;

    let subscription_id = tokio::time::timeout(timeout, await_confirmation(&mut write, &mut read))
        .await
        .map_err(|_| IndexerError::Transient("eth_subscribe confirmation timed out".into()))??;
    info!(subscription = %subscription_id, "eth_subscribe confirmed");

    let (sub, feed) = client::channel(capacity);
    tokio::spawn(run_feed(write, read, subscription_id, feed));
    Ok(sub)
}

/// Wait for the response to `eth_subscribe` and return the subscription id.
async fn await_confirmation(
    write: &mut SplitSink<WsStream, Message>,
    read: &mut SplitStream<WsStream>,
) -> Result<String, IndexerError> {
    while let Some(msg) = read.next().await {
        match msg.map_err(|e| IndexerError::Transient(format!("websocket error: {e}")))? {
            Message::Text(text) => {
                let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&text) else {
                    continue;
                };
                if resp.id != RpcId::Number(SUBSCRIBE_ID) {
                    continue;
                }
                let result = resp
                    .into_result()
                    .map_err(|e| IndexerError::Transient(format!("eth_subscribe: {e}")))?;
                return result.as_str().map(str::to_string).ok_or_else(|| {
                    IndexerError::Protocol(format!("eth_subscribe returned {result}"))
                });
            }
            Message::Ping(data) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Message::Close(_) => {
                return Err(IndexerError::Transient(
                    "websocket closed before eth_subscribe confirmed".into(),
                ))
            }
            _ => {}
        }
    }
    Err(IndexerError::Transient(
        "websocket ended before eth_subscribe confirmed".into(),
    ))
}

// ─── Feed task ────────────────────────────────────────────────────────────────

async fn run_feed(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    subscription_id: String,
    mut feed: SubscriptionFeed,
) {
    loop {
        tokio::select! {
            biased;
            _ = feed.unsubscribed() => {
                let req = JsonRpcRequest::new(
                    UNSUBSCRIBE_ID,
                    "eth_unsubscribe",
                    vec![json!(subscription_id)],
                );
                if let Ok(text) = serde_json::to_string(&req) {
                    let _ = write.send(Message::Text(text)).await;
                }
                let _ = write.send(Message::Close(None)).await;
                debug!(subscription = %subscription_id, "unsubscribed");
                break;
            }
            msg = read.next() => match msg {
                None => {
                    feed.connection_lost("websocket stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "websocket error");
                    feed.connection_lost(format!("websocket error: {e}"));
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    if let Some(log) = parse_notification(&text, &subscription_id) {
                        // A refused delivery means the consumer is gone; the
                        // next iteration takes the unsubscribe branch.
                        feed.deliver(log).await;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("websocket closed by server");
                    feed.connection_lost("websocket closed by server");
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("websocket feed ended");
}

/// Extract the log from an `eth_subscription` message for `subscription_id`.
/// Returns `None` for anything else.
fn parse_notification(text: &str, subscription_id: &str) -> Option<RawLog> {
    let note: SubscriptionNotification = serde_json::from_str(text).ok()?;
    if note.method != "eth_subscription" || note.params.subscription != subscription_id {
        return None;
    }
    match serde_json::from_value(note.params.result) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(error = %e, "unparseable log notification");
            None
        }
    }
}
