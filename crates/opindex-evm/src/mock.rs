//! Scripted chain and transport doubles for unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use opindex_core::client::{self, check_range, ChainClient, ChainClientFactory, LogSubscription, SubscriptionFeed};
use opindex_core::error::IndexerError;
use opindex_core::sink::{EventSink, UpsertOutcome};
use opindex_core::types::{ChainEvent, RawLog};
use opindex_core::DEFAULT_ENTRYPOINT;

use crate::decoder::user_operation_topic;
use crate::transport::RpcTransport;

/// A valid `UserOperationEvent` log from the default EntryPoint.
pub(crate) fn user_op_log(block: u64, tx_seed: u64, log_index: u64) -> RawLog {
    RawLog {
        address: DEFAULT_ENTRYPOINT.into(),
        topics: vec![
            user_operation_topic(),
            format!("0x{:064x}", block * 1_000 + log_index),
            format!("0x{:0>64}", "5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"),
            format!("0x{}", "0".repeat(64)),
        ],
        data: format!("0x{block:064x}{:064x}{:064x}{:064x}", 1, 21_000u64 * 7, 21_000),
        block_number: Some(format!("0x{block:x}")),
        block_hash: Some(format!("0x{block:064x}")),
        tx_hash: Some(format!("0x{tx_seed:064x}")),
        log_index: Some(format!("0x{log_index:x}")),
        removed: Some(false),
    }
}

// ─── MockChain ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    height: u64,
    logs: BTreeMap<u64, Vec<RawLog>>,
    queries: Vec<(u64, u64)>,
    fail_height: usize,
    fail_queries: usize,
    fail_subscribe: usize,
}

/// In-memory chain with a controllable head, historical logs and live feeds.
#[derive(Default)]
pub(crate) struct MockChain {
    state: Mutex<ChainState>,
    feeds: tokio::sync::Mutex<Vec<SubscriptionFeed>>,
    subscribe_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    hold_query: AtomicBool,
    query_entered: Notify,
    query_release: Notify,
}

impl MockChain {
    pub(crate) fn new(height: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.state.lock().unwrap().height = height;
        Arc::new(chain)
    }

    pub(crate) fn add_log(&self, log: RawLog) {
        let block = log.block_number_u64().unwrap();
        self.state.lock().unwrap().logs.entry(block).or_default().push(log);
    }

    pub(crate) fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub(crate) fn queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().queries.clone()
    }

    /// The next `n` `current_height` calls fail transiently.
    pub(crate) fn fail_height(&self, n: usize) {
        self.state.lock().unwrap().fail_height = n;
    }

    /// The next `n` `query_range` calls fail transiently. They are still
    /// recorded in [`queries`](Self::queries).
    pub(crate) fn fail_queries(&self, n: usize) {
        self.state.lock().unwrap().fail_queries = n;
    }

    /// The next `query_range` call parks after recording its range until
    /// [`release_query`](Self::release_query).
    pub(crate) fn hold_next_query(&self) {
        self.hold_query.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held query has been entered.
    pub(crate) async fn query_entered(&self) {
        self.query_entered.notified().await;
    }

    pub(crate) fn release_query(&self) {
        self.query_release.notify_one();
    }

    /// The next `n` `subscribe` calls fail transiently.
    pub(crate) fn fail_subscribe(&self, n: usize) {
        self.state.lock().unwrap().fail_subscribe = n;
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Push a log to every open live subscription.
    pub(crate) async fn emit(&self, log: RawLog) {
        let feeds = self.feeds.lock().await;
        for feed in feeds.iter() {
            feed.deliver(log.clone()).await;
        }
    }

    /// Fire the disconnect signal on every open subscription.
    pub(crate) async fn drop_connections(&self, reason: &str) {
        let mut feeds = self.feeds.lock().await;
        for feed in feeds.iter_mut() {
            feed.connection_lost(reason);
        }
        feeds.clear();
    }

    /// Number of subscriptions the consumer has not yet unsubscribed.
    pub(crate) async fn open_subscriptions(&self) -> usize {
        self.feeds
            .lock()
            .await
            .iter()
            .filter(|f| !f.is_unsubscribed())
            .count()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_height(&self) -> Result<u64, IndexerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_height > 0 {
            state.fail_height -= 1;
            return Err(IndexerError::Transient("eth_blockNumber: connection reset".into()));
        }
        Ok(state.height)
    }

    async fn query_range(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        check_range(from, to)?;
        {
            let mut state = self.state.lock().unwrap();
            state.queries.push((from, to));
            if state.fail_queries > 0 {
                state.fail_queries -= 1;
                return Err(IndexerError::Transient("eth_getLogs: upstream timeout".into()));
            }
        }
        if self.hold_query.swap(false, Ordering::SeqCst) {
            self.query_entered.notify_one();
            self.query_release.notified().await;
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .range(from..=to)
            .flat_map(|(_, logs)| logs.iter().cloned())
            .collect())
    }

    async fn subscribe(&self) -> Result<LogSubscription, IndexerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_subscribe > 0 {
                state.fail_subscribe -= 1;
                return Err(IndexerError::Transient("eth_subscribe: refused".into()));
            }
        }
        let (sub, feed) = client::channel(64);
        self.feeds.lock().await.push(feed);
        Ok(sub)
    }
}

/// Hands out the same [`MockChain`] on every connect.
pub(crate) struct MockFactory(pub(crate) Arc<MockChain>);

#[async_trait]
impl ChainClientFactory for MockFactory {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, IndexerError> {
        self.0.connect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.0.clone())
    }
}

// ─── Sinks ────────────────────────────────────────────────────────────────────

/// Wraps a sink and fails the `n`-th upsert call (1-based), once.
pub(crate) struct FlakySink<S> {
    inner: S,
    fail_on: u64,
    calls: AtomicU64,
}

impl<S> FlakySink<S> {
    pub(crate) fn new(inner: S, fail_on: u64) -> Self {
        Self {
            inner,
            fail_on,
            calls: AtomicU64::new(0),
        }
    }

    pub(crate) fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: EventSink> EventSink for FlakySink<S> {
    async fn upsert(&self, event: &ChainEvent) -> Result<UpsertOutcome, IndexerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(IndexerError::Storage("database is locked".into()));
        }
        self.inner.upsert(event).await
    }
}

// ─── ScriptedTransport ────────────────────────────────────────────────────────

/// Replies to JSON-RPC calls from per-method queues and records every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Result<Value, IndexerError>>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, method: &str, reply: Result<Value, IndexerError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn calls(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        self.calls.lock().unwrap().push((method.to_string(), params));
        self.replies
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(Value::Array(vec![])))
    }
}
