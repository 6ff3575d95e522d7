/// Challenge lifecycle controller.
///
/// Owns the current challenge of each signed-in user and enforces the
/// transition table. Illegal transitions are UI bugs and fail fast with
/// [`ChallengeError`]; nothing is ever silently ignored.
///
/// Every transition publishes the updated record to subscribers (same
/// subscription contract as the caches) and emits one append-only
/// [`ChallengeEvent`] to the [`ChallengeSink`]. Sink failures are logged and
/// never undo the transition.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::payment::{PurchaseOutcome, TransactionLedger};
use super::progress::Progress;
use super::{Challenge, ChallengeError, ChallengeStatus, Result};
use crate::config::CoreConfig;
use crate::rank::ChallengeRecord;
use crate::session::SessionProvider;
use crate::store::{KeyedObservableStore, ReconcilePolicy, Subscription};

#[cfg(feature = "native")]
use super::payment::PaymentProvider;

// ---------------------------------------------------------------------------
// Persistence collaborator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Started,
    Completed,
    PaymentPending,
    PaymentCancelled,
    Failed,
}

/// Audit record written once per transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeEvent {
    pub transition: Transition,
    pub challenge: Challenge,
    pub at: DateTime<Utc>,
}

/// Append-only persistence for challenge records and payment logs.
pub trait ChallengeSink: Send + Sync {
    fn record(&self, event: &ChallengeEvent) -> anyhow::Result<()>;
}

/// Sink for hosts that persist elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl ChallengeSink for DiscardSink {
    fn record(&self, _event: &ChallengeEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct ChallengeController {
    session: Arc<dyn SessionProvider>,
    sink: Arc<dyn ChallengeSink>,
    /// Latest record per user id; doubles as the observable surface.
    current: KeyedObservableStore<String, Challenge>,
    /// Terminal records, oldest first, capped at `history_capacity`.
    history: Vec<Challenge>,
    history_capacity: usize,
    ledger: TransactionLedger,
}

impl ChallengeController {
    pub fn new(
        session: Arc<dyn SessionProvider>,
        sink: Arc<dyn ChallengeSink>,
        config: &CoreConfig,
    ) -> Self {
        ChallengeController {
            session,
            sink,
            current: KeyedObservableStore::new("challenges", ReconcilePolicy::ServerAuthoritative),
            history: Vec::new(),
            history_capacity: config.history_capacity.max(1),
            ledger: TransactionLedger::new(config.payment_replay_capacity),
        }
    }

    fn user(&self) -> Result<String> {
        self.session
            .current_user_id()
            .ok_or(ChallengeError::Unauthenticated)
    }

    /// The signed-in user's latest challenge (possibly terminal).
    pub fn snapshot(&self) -> Option<Challenge> {
        let user = self.session.current_user_id()?;
        self.current.get(&user)
    }

    /// `Idle` when signed out or when no challenge was ever started.
    pub fn status(&self) -> ChallengeStatus {
        self.snapshot().map_or(ChallengeStatus::Idle, |c| c.status)
    }

    /// Progress of the running challenge. `None` unless Active or PendingPayment.
    pub fn progress(&self, now: DateTime<Utc>) -> Option<Progress> {
        self.snapshot()
            .filter(|c| !c.status.is_terminal())
            .map(|c| c.progress(now))
    }

    /// Terminal challenges seen by this controller, oldest first.
    pub fn history(&self) -> &[Challenge] {
        &self.history
    }

    /// Hand the recorded history to the host (e.g. after ranking upload).
    pub fn take_history(&mut self) -> Vec<Challenge> {
        std::mem::take(&mut self.history)
    }

    /// History plus running challenges, ready for the leaderboard.
    pub fn ranking_records(&self) -> Vec<ChallengeRecord> {
        let mut records: Vec<ChallengeRecord> =
            self.history.iter().map(ChallengeRecord::from).collect();
        for user in self.current.keys() {
            if let Some(c) = self.current.get(&user) {
                if !c.status.is_terminal() {
                    records.push(ChallengeRecord::from(&c));
                }
            }
        }
        records
    }

    /// Observe the signed-in user's challenge record.
    pub fn subscribe<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&Challenge) + Send + Sync + 'static,
    {
        let user = self.user()?;
        Ok(self.current.subscribe(user, callback))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Idle (or terminal) → Active.
    pub fn start(&mut self, goal_days: u32, penalty_amount: u64, now: DateTime<Utc>) -> Result<Challenge> {
        let user = self.user()?;
        if goal_days == 0 {
            return Err(ChallengeError::InvalidGoal);
        }
        if let Some(existing) = self.current.get(&user) {
            if !existing.status.is_terminal() {
                return Err(ChallengeError::InvalidState {
                    op: "start",
                    status: existing.status,
                });
            }
        }

        let challenge = Challenge::begin(&user, goal_days, penalty_amount, now);
        log::info!(
            "Challenge {} started: {} day(s), penalty {}",
            challenge.id,
            goal_days,
            penalty_amount
        );
        Ok(self.commit(Transition::Started, challenge, now))
    }

    /// Active → Completed | Failed | PendingPayment.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<Challenge> {
        let mut challenge = self.require("stop", ChallengeStatus::Active)?;
        let progress = challenge.progress(now);

        let transition = if progress.is_goal_achieved {
            challenge.status = ChallengeStatus::Completed;
            challenge.completed_at = Some(now);
            Transition::Completed
        } else if challenge.penalty_amount == 0 {
            challenge.status = ChallengeStatus::Failed;
            challenge.failed_at = Some(now);
            Transition::Failed
        } else {
            challenge.status = ChallengeStatus::PendingPayment;
            challenge.stop_requested_at = Some(now);
            Transition::PaymentPending
        };

        log::info!(
            "Challenge {} stopped at {:.1}% -> {}",
            challenge.id,
            progress.progress_percent,
            challenge.status
        );
        Ok(self.commit(transition, challenge, now))
    }

    /// PendingPayment → Failed, recording the penalty transaction.
    pub fn confirm_payment(&mut self, tx_ref: &str, now: DateTime<Utc>) -> Result<Challenge> {
        let mut challenge = self.require_pending_payment()?;
        let tx_ref = tx_ref.trim();
        if tx_ref.is_empty() {
            return Err(ChallengeError::PaymentRequired);
        }
        if !self.ledger.consume(tx_ref, now) {
            return Err(ChallengeError::DuplicateTransaction(tx_ref.to_string()));
        }

        challenge.status = ChallengeStatus::Failed;
        challenge.failed_at = Some(now);
        challenge.payment_tx = Some(tx_ref.to_string());
        log::info!("Challenge {} failed, penalty paid ({})", challenge.id, tx_ref);
        Ok(self.commit(Transition::Failed, challenge, now))
    }

    /// PendingPayment → Active: the user declined to pay, the timer keeps running.
    pub fn cancel_payment(&mut self, now: DateTime<Utc>) -> Result<Challenge> {
        let mut challenge = self.require("cancel payment", ChallengeStatus::PendingPayment)?;
        challenge.status = ChallengeStatus::Active;
        challenge.stop_requested_at = None;
        log::info!("Challenge {} payment cancelled, back to active", challenge.id);
        Ok(self.commit(Transition::PaymentCancelled, challenge, now))
    }

    /// Apply a payment provider result. A failed purchase leaves the
    /// challenge in PendingPayment so the user can retry or cancel.
    pub fn settle_payment(&mut self, outcome: &PurchaseOutcome, now: DateTime<Utc>) -> Result<Challenge> {
        self.require_pending_payment()?;

        if outcome.success {
            match outcome.transaction_id.as_deref() {
                Some(tx) if !tx.trim().is_empty() => self.confirm_payment(tx, now),
                _ => {
                    log::warn!("⚠️  Payment reported success without a transaction id");
                    Err(ChallengeError::PaymentFailed(
                        "success reported without transaction id".to_string(),
                    ))
                }
            }
        } else if outcome.cancelled {
            self.cancel_payment(now)
        } else {
            log::warn!("⚠️  Penalty payment declined; challenge stays pending");
            Err(ChallengeError::PaymentFailed("purchase declined".to_string()))
        }
    }

    /// Run one purchase attempt for the pending penalty and settle it.
    #[cfg(feature = "native")]
    pub async fn pay_penalty<P: PaymentProvider>(
        &mut self,
        provider: &P,
        now: DateTime<Utc>,
    ) -> Result<Challenge> {
        let challenge = self.require_pending_payment()?;
        let outcome = match provider.purchase(challenge.penalty_amount).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("⚠️  Payment provider error: {}", e);
                return Err(ChallengeError::PaymentFailed(e.to_string()));
            }
        };
        self.settle_payment(&outcome, now)
    }

    /// Rehydrate a persisted record at startup. No audit write is emitted.
    pub fn restore(&mut self, challenge: Challenge, now: DateTime<Utc>) -> Result<()> {
        let user = self.user()?;
        if challenge.user_id != user {
            return Err(ChallengeError::ForeignRecord);
        }
        if let Some(existing) = self.current.get(&user) {
            if !existing.status.is_terminal() {
                return Err(ChallengeError::InvalidState {
                    op: "restore",
                    status: existing.status,
                });
            }
        }
        if let Some(tx) = challenge.payment_tx.as_deref() {
            self.ledger.consume(tx, now);
        }
        if challenge.status.is_terminal() {
            self.push_history(challenge.clone());
        }
        log::info!("Challenge {} restored ({})", challenge.id, challenge.status);
        self.current.set(user, challenge);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require(&self, op: &'static str, expected: ChallengeStatus) -> Result<Challenge> {
        let user = self.user()?;
        match self.current.get(&user) {
            Some(c) if c.status == expected => Ok(c),
            Some(c) => Err(ChallengeError::InvalidState { op, status: c.status }),
            None => Err(ChallengeError::InvalidState {
                op,
                status: ChallengeStatus::Idle,
            }),
        }
    }

    fn require_pending_payment(&self) -> Result<Challenge> {
        let user = self.user()?;
        match self.current.get(&user) {
            Some(c) if c.status == ChallengeStatus::PendingPayment => Ok(c),
            _ => Err(ChallengeError::PaymentRequired),
        }
    }

    fn push_history(&mut self, challenge: Challenge) {
        self.history.push(challenge);
        if self.history.len() > self.history_capacity {
            let excess = self.history.len() - self.history_capacity;
            self.history.drain(..excess);
            log::debug!("Challenge history trimmed by {}", excess);
        }
    }

    fn commit(&mut self, transition: Transition, challenge: Challenge, now: DateTime<Utc>) -> Challenge {
        if challenge.status.is_terminal() {
            self.push_history(challenge.clone());
        }
        self.current.set(challenge.user_id.clone(), challenge.clone());

        let event = ChallengeEvent {
            transition,
            challenge: challenge.clone(),
            at: now,
        };
        if let Err(e) = self.sink.record(&event) {
            log::warn!(
                "⚠️  Failed to persist {:?} for challenge {}: {}",
                transition,
                challenge.id,
                e
            );
        }
        challenge
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LocalSession;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        events: Mutex<Vec<ChallengeEvent>>,
    }

    impl ChallengeSink for MemorySink {
        fn record(&self, event: &ChallengeEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    impl ChallengeSink for BrokenSink {
        fn record(&self, _event: &ChallengeEvent) -> anyhow::Result<()> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    fn controller() -> (ChallengeController, Arc<MemorySink>, Arc<LocalSession>) {
        let session = Arc::new(LocalSession::signed_in("u1"));
        let sink = Arc::new(MemorySink::default());
        let ctl = ChallengeController::new(session.clone(), sink.clone(), &CoreConfig::default());
        (ctl, sink, session)
    }

    fn transitions(sink: &MemorySink) -> Vec<Transition> {
        sink.events.lock().unwrap().iter().map(|e| e.transition).collect()
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let (mut ctl, _, _) = controller();
        ctl.start(7, 0, t0()).unwrap();
        assert_eq!(
            ctl.start(7, 0, t0()),
            Err(ChallengeError::InvalidState {
                op: "start",
                status: ChallengeStatus::Active
            })
        );
    }

    #[test]
    fn test_start_requires_session() {
        let (mut ctl, _, session) = controller();
        session.sign_out();
        assert_eq!(ctl.start(7, 0, t0()), Err(ChallengeError::Unauthenticated));
        assert_eq!(ctl.status(), ChallengeStatus::Idle);
    }

    #[test]
    fn test_start_while_payment_pending_is_invalid() {
        let (mut ctl, _, _) = controller();
        ctl.start(7, 500, t0()).unwrap();
        ctl.stop(t0() + Duration::days(1)).unwrap();
        assert_eq!(
            ctl.start(3, 0, t0() + Duration::days(1)),
            Err(ChallengeError::InvalidState {
                op: "start",
                status: ChallengeStatus::PendingPayment
            })
        );
        assert_eq!(ctl.status(), ChallengeStatus::PendingPayment);
    }

    #[test]
    fn test_history_is_capped_and_drainable() {
        let session = Arc::new(LocalSession::signed_in("u1"));
        let config = CoreConfig {
            history_capacity: 2,
            ..CoreConfig::default()
        };
        let mut ctl = ChallengeController::new(session, Arc::new(DiscardSink), &config);
        for day in 0..3 {
            ctl.start(1, 0, t0() + Duration::days(day * 2)).unwrap();
            ctl.stop(t0() + Duration::days(day * 2 + 1)).unwrap();
        }
        assert_eq!(ctl.history().len(), 2);
        assert_eq!(ctl.history()[0].started_at, t0() + Duration::days(2));

        let drained = ctl.take_history();
        assert_eq!(drained.len(), 2);
        assert!(ctl.history().is_empty());
    }

    #[test]
    fn test_zero_goal_rejected() {
        let (mut ctl, _, _) = controller();
        assert_eq!(ctl.start(0, 0, t0()), Err(ChallengeError::InvalidGoal));
    }

    #[test]
    fn test_goal_achieved_completes_regardless_of_penalty() {
        let (mut ctl, sink, _) = controller();
        ctl.start(7, 500, t0()).unwrap();
        let done = ctl.stop(t0() + Duration::days(8)).unwrap();

        assert_eq!(done.status, ChallengeStatus::Completed);
        assert_eq!(done.completed_at, Some(t0() + Duration::days(8)));
        assert!(done.failed_at.is_none());
        assert_eq!(transitions(&sink), vec![Transition::Started, Transition::Completed]);
        assert_eq!(ctl.history().len(), 1);
    }

    #[test]
    fn test_early_stop_without_penalty_fails_immediately() {
        let (mut ctl, _, _) = controller();
        ctl.start(7, 0, t0()).unwrap();
        let stopped = ctl.stop(t0() + Duration::days(3)).unwrap();
        assert_eq!(stopped.status, ChallengeStatus::Failed);
        assert_eq!(stopped.failed_at, Some(t0() + Duration::days(3)));
        assert!(stopped.payment_tx.is_none());
    }

    #[test]
    fn test_penalty_flow_confirm() {
        let (mut ctl, sink, _) = controller();
        ctl.start(7, 500, t0()).unwrap();
        let pending = ctl.stop(t0() + Duration::days(3)).unwrap();
        assert_eq!(pending.status, ChallengeStatus::PendingPayment);
        assert!(pending.failed_at.is_none());

        let paid_at = t0() + Duration::days(3) + Duration::minutes(1);
        let failed = ctl.confirm_payment("tx1", paid_at).unwrap();
        assert_eq!(failed.status, ChallengeStatus::Failed);
        assert_eq!(failed.failed_at, Some(paid_at));
        assert_eq!(failed.payment_tx.as_deref(), Some("tx1"));
        assert_eq!(
            transitions(&sink),
            vec![Transition::Started, Transition::PaymentPending, Transition::Failed]
        );
    }

    #[test]
    fn test_confirm_payment_outside_pending() {
        let (mut ctl, _, _) = controller();
        assert_eq!(ctl.confirm_payment("tx", t0()), Err(ChallengeError::PaymentRequired));
        ctl.start(7, 500, t0()).unwrap();
        assert_eq!(ctl.confirm_payment("tx", t0()), Err(ChallengeError::PaymentRequired));
    }

    #[test]
    fn test_confirm_payment_requires_transaction() {
        let (mut ctl, _, _) = controller();
        ctl.start(7, 500, t0()).unwrap();
        ctl.stop(t0() + Duration::days(1)).unwrap();
        assert_eq!(ctl.confirm_payment("  ", t0()), Err(ChallengeError::PaymentRequired));
        assert_eq!(ctl.status(), ChallengeStatus::PendingPayment);
    }

    #[test]
    fn test_transaction_cannot_settle_twice() {
        let (mut ctl, _, _) = controller();
        ctl.start(7, 500, t0()).unwrap();
        ctl.stop(t0() + Duration::days(1)).unwrap();
        ctl.confirm_payment("tx1", t0() + Duration::days(1)).unwrap();

        ctl.start(3, 100, t0() + Duration::days(2)).unwrap();
        ctl.stop(t0() + Duration::days(3)).unwrap();
        assert_eq!(
            ctl.confirm_payment("tx1", t0() + Duration::days(3)),
            Err(ChallengeError::DuplicateTransaction("tx1".into()))
        );
        assert_eq!(ctl.status(), ChallengeStatus::PendingPayment);
    }

    #[test]
    fn test_cancel_payment_resumes() {
        let (mut ctl, _, _) = controller();
        ctl.start(7, 500, t0()).unwrap();
        ctl.stop(t0() + Duration::days(2)).unwrap();
        let resumed = ctl.cancel_payment(t0() + Duration::days(2)).unwrap();
        assert_eq!(resumed.status, ChallengeStatus::Active);
        assert!(resumed.stop_requested_at.is_none());
        assert_eq!(resumed.started_at, t0());

        assert!(matches!(
            ctl.cancel_payment(t0()),
            Err(ChallengeError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_stop_from_idle_is_invalid() {
        let (mut ctl, _, _) = controller();
        assert_eq!(
            ctl.stop(t0()),
            Err(ChallengeError::InvalidState {
                op: "stop",
                status: ChallengeStatus::Idle
            })
        );
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let (mut ctl, _, _) = controller();
        ctl.start(1, 0, t0()).unwrap();
        ctl.stop(t0() + Duration::days(2)).unwrap();
        assert!(ctl.stop(t0() + Duration::days(3)).is_err());
        assert!(ctl.cancel_payment(t0()).is_err());
        assert_eq!(ctl.status(), ChallengeStatus::Completed);

        // A new challenge may start after a terminal one.
        assert!(ctl.start(3, 0, t0() + Duration::days(3)).is_ok());
    }

    #[test]
    fn test_settle_payment_outcomes() {
        let (mut ctl, _, _) = controller();
        ctl.start(7, 500, t0()).unwrap();
        ctl.stop(t0() + Duration::days(1)).unwrap();

        let declined = ctl.settle_payment(&PurchaseOutcome::failed(), t0());
        assert!(matches!(declined, Err(ChallengeError::PaymentFailed(_))));
        assert_eq!(ctl.status(), ChallengeStatus::PendingPayment);

        let no_tx = PurchaseOutcome {
            success: true,
            transaction_id: None,
            cancelled: false,
        };
        assert!(matches!(
            ctl.settle_payment(&no_tx, t0()),
            Err(ChallengeError::PaymentFailed(_))
        ));
        assert_eq!(ctl.status(), ChallengeStatus::PendingPayment);

        let cancelled = ctl.settle_payment(&PurchaseOutcome::cancelled(), t0()).unwrap();
        assert_eq!(cancelled.status, ChallengeStatus::Active);

        ctl.stop(t0() + Duration::days(2)).unwrap();
        let paid = ctl.settle_payment(&PurchaseOutcome::paid("tx7"), t0()).unwrap();
        assert_eq!(paid.status, ChallengeStatus::Failed);
        assert_eq!(paid.payment_tx.as_deref(), Some("tx7"));
    }

    #[test]
    fn test_sink_failure_does_not_block_transition() {
        let session = Arc::new(LocalSession::signed_in("u1"));
        let mut ctl =
            ChallengeController::new(session, Arc::new(BrokenSink), &CoreConfig::default());
        let c = ctl.start(7, 0, t0()).unwrap();
        assert_eq!(c.status, ChallengeStatus::Active);
        assert_eq!(ctl.status(), ChallengeStatus::Active);
    }

    #[test]
    fn test_subscribers_see_each_transition() {
        let (mut ctl, _, _) = controller();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = ctl
            .subscribe(move |c: &Challenge| s.lock().unwrap().push(c.status))
            .unwrap();

        ctl.start(7, 500, t0()).unwrap();
        ctl.stop(t0() + Duration::days(1)).unwrap();
        ctl.cancel_payment(t0() + Duration::days(1)).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ChallengeStatus::Active,
                ChallengeStatus::PendingPayment,
                ChallengeStatus::Active
            ]
        );
    }

    #[test]
    fn test_users_are_isolated() {
        let (mut ctl, _, session) = controller();
        ctl.start(7, 0, t0()).unwrap();
        session.sign_in("u2");
        assert_eq!(ctl.status(), ChallengeStatus::Idle);
        assert!(ctl.start(3, 0, t0()).is_ok());
        assert_eq!(ctl.ranking_records().len(), 2);
    }

    #[test]
    fn test_progress_only_while_running() {
        let (mut ctl, _, _) = controller();
        assert!(ctl.progress(t0()).is_none());
        ctl.start(2, 0, t0()).unwrap();
        let p = ctl.progress(t0() + Duration::days(1)).unwrap();
        assert_eq!(p.progress_percent, 50.0);
        ctl.stop(t0() + Duration::days(1)).unwrap();
        assert!(ctl.progress(t0() + Duration::days(1)).is_none());
    }

    #[test]
    fn test_restore() {
        let (mut ctl, sink, _) = controller();
        let mut saved = Challenge::begin("u1", 7, 500, t0());
        saved.status = ChallengeStatus::PendingPayment;
        ctl.restore(saved.clone(), t0()).unwrap();
        assert_eq!(ctl.status(), ChallengeStatus::PendingPayment);
        assert!(transitions(&sink).is_empty());

        let other = Challenge::begin("u2", 7, 0, t0());
        assert_eq!(ctl.restore(other, t0()), Err(ChallengeError::ForeignRecord));
        assert!(matches!(
            ctl.restore(saved, t0()),
            Err(ChallengeError::InvalidState { op: "restore", .. })
        ));
    }

    #[test]
    fn test_restored_transaction_not_reusable() {
        let (mut ctl, _, _) = controller();
        let mut old = Challenge::begin("u1", 7, 500, t0());
        old.status = ChallengeStatus::Failed;
        old.failed_at = Some(t0() + Duration::days(1));
        old.payment_tx = Some("tx-old".into());
        ctl.restore(old, t0() + Duration::days(2)).unwrap();
        assert_eq!(ctl.history().len(), 1);

        ctl.start(7, 500, t0() + Duration::days(2)).unwrap();
        ctl.stop(t0() + Duration::days(3)).unwrap();
        assert!(matches!(
            ctl.confirm_payment("tx-old", t0() + Duration::days(3)),
            Err(ChallengeError::DuplicateTransaction(_))
        ));
    }

    #[cfg(feature = "native")]
    mod async_payment {
        use super::*;

        struct ScriptedProvider {
            outcome: anyhow::Result<PurchaseOutcome>,
            calls: Mutex<Vec<u64>>,
        }

        impl PaymentProvider for ScriptedProvider {
            fn purchase(
                &self,
                amount: u64,
            ) -> impl std::future::Future<Output = anyhow::Result<PurchaseOutcome>> + Send {
                self.calls.lock().unwrap().push(amount);
                let outcome = match &self.outcome {
                    Ok(o) => Ok(o.clone()),
                    Err(e) => Err(anyhow::anyhow!(e.to_string())),
                };
                async move { outcome }
            }
        }

        #[tokio::test]
        async fn test_pay_penalty_success() {
            let (mut ctl, _, _) = controller();
            ctl.start(7, 500, t0()).unwrap();
            ctl.stop(t0() + Duration::days(3)).unwrap();

            let provider = ScriptedProvider {
                outcome: Ok(PurchaseOutcome::paid("tx1")),
                calls: Mutex::new(Vec::new()),
            };
            let failed = ctl.pay_penalty(&provider, t0() + Duration::days(3)).await.unwrap();

            assert_eq!(failed.status, ChallengeStatus::Failed);
            assert_eq!(failed.payment_tx.as_deref(), Some("tx1"));
            assert_eq!(*provider.calls.lock().unwrap(), vec![500]);
        }

        #[tokio::test]
        async fn test_pay_penalty_provider_error_keeps_pending() {
            let (mut ctl, _, _) = controller();
            ctl.start(7, 500, t0()).unwrap();
            ctl.stop(t0() + Duration::days(3)).unwrap();

            let provider = ScriptedProvider {
                outcome: Err(anyhow::anyhow!("store unavailable")),
                calls: Mutex::new(Vec::new()),
            };
            let result = ctl.pay_penalty(&provider, t0()).await;
            assert!(matches!(result, Err(ChallengeError::PaymentFailed(_))));
            assert_eq!(ctl.status(), ChallengeStatus::PendingPayment);
        }

        #[tokio::test]
        async fn test_pay_penalty_requires_pending() {
            let (mut ctl, _, _) = controller();
            let provider = ScriptedProvider {
                outcome: Ok(PurchaseOutcome::paid("tx1")),
                calls: Mutex::new(Vec::new()),
            };
            assert_eq!(
                ctl.pay_penalty(&provider, t0()).await,
                Err(ChallengeError::PaymentRequired)
            );
            assert!(provider.calls.lock().unwrap().is_empty());
        }
    }
}
