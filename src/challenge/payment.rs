//! Penalty payment
//!
//! The payment SDK lives in the app shell; the core only sees the outcome of a
//! purchase. A transaction id can settle at most one challenge: ids already
//! consumed are remembered in an LRU ledger and rejected as replays.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Default number of transaction ids remembered for replay detection.
pub const DEFAULT_LEDGER_CAPACITY: usize = 1024;

/// Result of one purchase attempt, as reported by the payment provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOutcome {
    pub success: bool,
    #[serde(rename = "transactionId", default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

impl PurchaseOutcome {
    pub fn paid(transaction_id: &str) -> Self {
        PurchaseOutcome {
            success: true,
            transaction_id: Some(transaction_id.to_string()),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        PurchaseOutcome {
            success: false,
            transaction_id: None,
            cancelled: true,
        }
    }

    pub fn failed() -> Self {
        PurchaseOutcome::default()
    }
}

/// Payment provider collaborator. Invoked once per settlement attempt.
#[cfg(feature = "native")]
pub trait PaymentProvider {
    fn purchase(
        &self,
        amount: u64,
    ) -> impl std::future::Future<Output = anyhow::Result<PurchaseOutcome>> + Send;
}

/// Replay guard for consumed transaction ids.
pub struct TransactionLedger {
    seen: LruCache<String, DateTime<Utc>>,
}

impl TransactionLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::MIN);
        TransactionLedger {
            seen: LruCache::new(capacity),
        }
    }

    pub fn contains(&self, tx_ref: &str) -> bool {
        self.seen.contains(tx_ref)
    }

    /// Record `tx_ref`. Returns `false` if it was already consumed.
    pub fn consume(&mut self, tx_ref: &str, now: DateTime<Utc>) -> bool {
        if self.seen.contains(tx_ref) {
            log::warn!("⚠️  Payment transaction {} replayed", tx_ref);
            return false;
        }
        self.seen.put(tx_ref.to_string(), now);
        log::debug!("✓ Transaction recorded (ledger size: {})", self.seen.len());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for TransactionLedger {
    fn default() -> Self {
        TransactionLedger::new(DEFAULT_LEDGER_CAPACITY)
    }
}
