/// Realtime feed pump.
///
/// Backend listeners push snapshots into an unbounded channel; the pump drains
/// it and routes every message through the stores' server entry point, so
/// realtime updates obey the same lock and equality rules as refetches.
/// Messages are applied strictly in arrival order.
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::payload::RemoteEvent;
use crate::store::{KeyedObservableStore, Reconciled};
use crate::stores::Stores;

/// One keyed server snapshot for a single store.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> FeedEvent<K, V> {
    pub fn new(key: K, value: V) -> Self {
        FeedEvent { key, value }
    }
}

/// What happened to the messages of one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub applied: usize,
    pub deferred: usize,
    pub unchanged: usize,
    /// Malformed payloads dropped before reaching a store.
    pub rejected: usize,
}

impl PumpStats {
    fn record(&mut self, outcome: Reconciled) {
        match outcome {
            Reconciled::Applied => self.applied += 1,
            Reconciled::Deferred => self.deferred += 1,
            Reconciled::Unchanged => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.deferred + self.unchanged + self.rejected
    }
}

/// Drain `rx` into `store` until every sender is dropped.
pub async fn pump<K, V>(
    mut rx: mpsc::UnboundedReceiver<FeedEvent<K, V>>,
    store: Arc<KeyedObservableStore<K, V>>,
) -> PumpStats
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    let mut stats = PumpStats::default();
    while let Some(event) = rx.recv().await {
        stats.record(store.reconcile_from_server(event.key, event.value));
    }
    log::debug!("Feed pump for {} closed: {:?}", store.name(), stats);
    stats
}

/// Run [`pump`] on the current tokio runtime.
pub fn spawn_pump<K, V>(
    rx: mpsc::UnboundedReceiver<FeedEvent<K, V>>,
    store: Arc<KeyedObservableStore<K, V>>,
) -> JoinHandle<PumpStats>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    tokio::spawn(pump(rx, store))
}

/// Drain raw JSON payloads, validate them and dispatch into `stores`.
///
/// Invalid payloads are logged and counted, never applied.
pub async fn pump_remote(mut rx: mpsc::UnboundedReceiver<String>, stores: Stores) -> PumpStats {
    let mut stats = PumpStats::default();
    while let Some(raw) = rx.recv().await {
        match RemoteEvent::parse(&raw) {
            Ok(event) => stats.record(stores.dispatch(event)),
            Err(e) => {
                log::warn!("⚠️  Dropping realtime payload: {}", e);
                stats.rejected += 1;
            }
        }
    }
    log::info!("✓ Remote feed closed ({} messages)", stats.total());
    stats
}
