//! Pipeline metrics shared by the backfill runner, live subscriber and
//! sink writer.
//!
//! Counters are OpenTelemetry instruments; they reach an exporter once the
//! host process installs a meter provider. Without one the global no-op
//! provider swallows them. A local tally backs [`IndexerMetrics::snapshot`]
//! for shutdown logs and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::{
    global,
    metrics::{Counter, Meter},
    KeyValue,
};
use serde::{Deserialize, Serialize};

use crate::sink::UpsertOutcome;

/// Meter name used when no meter is supplied.
pub const METER_NAME: &str = "opindex";

/// Counter handles plus a local tally of everything recorded through them.
pub struct IndexerMetrics {
    events_inserted: Counter<u64>,
    events_duplicate: Counter<u64>,
    decode_errors: Counter<u64>,
    sink_errors: Counter<u64>,
    batches_committed: Counter<u64>,
    reconnections: Counter<u64>,
    attributes: Vec<KeyValue>,
    tally: Tally,
}

#[derive(Debug, Default)]
struct Tally {
    events_inserted: AtomicU64,
    events_duplicate: AtomicU64,
    decode_errors: AtomicU64,
    sink_errors: AtomicU64,
    batches_committed: AtomicU64,
    reconnections: AtomicU64,
}

/// Point-in-time copy of [`IndexerMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_inserted: u64,
    pub events_duplicate: u64,
    pub decode_errors: u64,
    pub sink_errors: u64,
    pub batches_committed: u64,
    pub reconnections: u64,
}

impl IndexerMetrics {
    /// Instruments created from `meter`, each data point tagged with `indexer`.
    pub fn new(meter: &Meter, indexer_id: &str) -> Self {
        Self {
            events_inserted: meter
                .u64_counter("opindex.events_inserted")
                .with_description("UserOperationEvents stored for the first time")
                .build(),
            events_duplicate: meter
                .u64_counter("opindex.events_duplicate")
                .with_description("Upserts that found the event already stored")
                .build(),
            decode_errors: meter
                .u64_counter("opindex.decode_errors")
                .with_description("Logs that could not be decoded as UserOperationEvent")
                .build(),
            sink_errors: meter
                .u64_counter("opindex.sink_errors")
                .with_description("Failed event upserts")
                .build(),
            batches_committed: meter
                .u64_counter("opindex.batches_committed")
                .with_description("Backfill batches whose checkpoint was saved")
                .build(),
            reconnections: meter
                .u64_counter("opindex.reconnections")
                .with_description("Live subscriptions re-established after a loss")
                .build(),
            attributes: vec![KeyValue::new("indexer", indexer_id.to_string())],
            tally: Tally::default(),
        }
    }

    /// Instruments from the global meter provider.
    pub fn global(indexer_id: &str) -> Self {
        Self::new(&global::meter(METER_NAME), indexer_id)
    }

    pub fn record_upsert(&self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => {
                Self::bump(&self.events_inserted, &self.tally.events_inserted, &self.attributes)
            }
            UpsertOutcome::AlreadyPresent => {
                Self::bump(&self.events_duplicate, &self.tally.events_duplicate, &self.attributes)
            }
        }
    }

    pub fn record_decode_error(&self) {
        Self::bump(&self.decode_errors, &self.tally.decode_errors, &self.attributes);
    }

    pub fn record_sink_error(&self) {
        Self::bump(&self.sink_errors, &self.tally.sink_errors, &self.attributes);
    }

    pub fn record_batch(&self) {
        Self::bump(&self.batches_committed, &self.tally.batches_committed, &self.attributes);
    }

    pub fn record_reconnection(&self) {
        Self::bump(&self.reconnections, &self.tally.reconnections, &self.attributes);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let t = &self.tally;
        MetricsSnapshot {
            events_inserted: t.events_inserted.load(Ordering::Relaxed),
            events_duplicate: t.events_duplicate.load(Ordering::Relaxed),
            decode_errors: t.decode_errors.load(Ordering::Relaxed),
            sink_errors: t.sink_errors.load(Ordering::Relaxed),
            batches_committed: t.batches_committed.load(Ordering::Relaxed),
            reconnections: t.reconnections.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &Counter<u64>, tally: &AtomicU64, attributes: &[KeyValue]) {
        counter.add(1, attributes);
        tally.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for IndexerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerMetrics")
            .field("attributes", &self.attributes)
            .field("tally", &self.snapshot())
            .finish()
    }
}
