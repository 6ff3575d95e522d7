/// Challenge lifecycle.
///
/// A challenge is a timer with a goal in days and an optional penalty. Stopping
/// early with a penalty does not fail the challenge directly: it parks it in
/// `PendingPayment` until the payment provider confirms a transaction (or the
/// user backs out and the timer keeps running).
///
/// ```text
/// Idle ──start──▶ Active ──stop (goal reached)──────────▶ Completed
///                   │  ▲
///                   │  └──cancel_payment──┐
///                   ├──stop (penalty > 0)─▶ PendingPayment ──confirm_payment──▶ Failed
///                   └──stop (penalty = 0)────────────────────────────────────▶ Failed
/// ```
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod controller;
pub mod payment;
pub mod progress;

pub use controller::{ChallengeController, ChallengeEvent, ChallengeSink, DiscardSink, Transition};
pub use payment::{PurchaseOutcome, TransactionLedger};
#[cfg(feature = "native")]
pub use payment::PaymentProvider;
pub use progress::{compute_progress, Progress, TimeBreakdown};

/// Wall-clock seconds in a goal day.
pub const SECONDS_PER_DAY: i64 = 86_400;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("Cannot {op} while challenge is {status}")]
    InvalidState {
        op: &'static str,
        status: ChallengeStatus,
    },
    #[error("Penalty payment required before the challenge can fail")]
    PaymentRequired,
    #[error("Penalty payment did not succeed: {0}")]
    PaymentFailed(String),
    #[error("Transaction already used: {0}")]
    DuplicateTransaction(String),
    #[error("Goal must be at least one day")]
    InvalidGoal,
    #[error("No signed-in user")]
    Unauthenticated,
    #[error("Challenge record belongs to another user")]
    ForeignRecord,
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ChallengeError>;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    #[default]
    Idle,
    Active,
    PendingPayment,
    Completed,
    Failed,
}

impl ChallengeStatus {
    /// Completed and Failed records are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, ChallengeStatus::Completed | ChallengeStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeStatus::Idle => "idle",
            ChallengeStatus::Active => "active",
            ChallengeStatus::PendingPayment => "pending_payment",
            ChallengeStatus::Completed => "completed",
            ChallengeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Challenge record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "goalDays")]
    pub goal_days: u32,
    #[serde(rename = "penaltyAmount")]
    pub penalty_amount: u64,
    pub status: ChallengeStatus,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "completedAt", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "failedAt", default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// When the user asked to stop; set while a penalty payment is pending.
    #[serde(rename = "stopRequestedAt", default)]
    pub stop_requested_at: Option<DateTime<Utc>>,
    #[serde(rename = "paymentTx", default)]
    pub payment_tx: Option<String>,
}

impl Challenge {
    /// A fresh `Active` challenge.
    pub fn begin(user_id: &str, goal_days: u32, penalty_amount: u64, now: DateTime<Utc>) -> Self {
        Challenge {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            goal_days,
            penalty_amount,
            status: ChallengeStatus::Active,
            started_at: now,
            completed_at: None,
            failed_at: None,
            stop_requested_at: None,
            payment_tx: None,
        }
    }

    pub fn progress(&self, now: DateTime<Utc>) -> Progress {
        compute_progress(self.goal_days, self.started_at, now)
    }

    /// Serialize for the local snapshot file.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ChallengeError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| ChallengeError::Serialization(e.to_string()))
    }
}
