//! # Challenge Core
//!
//! Client-side state core for the challenge tracking app: the pieces where
//! ordering, idempotence and failure recovery actually matter.
//!
//! - **Observable caches** with optimistic mutation and server reconciliation
//!   (likes, reply counts, blocked / followed ids, profile snapshots)
//! - **Challenge lifecycle** state machine with penalty-payment gating
//! - **Rank tiers and leaderboards** computed from challenge durations
//!
//! ## Quick Start
//!
//! ```rust
//! use challenge_core::stores::{LikeState, LikeStore};
//!
//! let likes = LikeStore::new();
//! likes.init("post-1", LikeState::new(false, 5));
//!
//! let pending = likes.toggle("post-1").expect("initialised");
//! assert_eq!(likes.get("post-1"), Some(LikeState::new(true, 6)));
//!
//! // Backend call failed: roll the optimistic toggle back.
//! likes.settle(pending, Err::<Option<LikeState>, _>("offline"));
//! assert_eq!(likes.get("post-1"), Some(LikeState::new(false, 5)));
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | Keyed observable store, lock flag, reconciliation policy, two-phase optimistic writes |
//! | [`stores`] | Like / reply count / id set / profile stores and the [`stores::Stores`] bundle |
//! | [`challenge`] | Challenge lifecycle controller, progress, payment settlement |
//! | [`rank`] | Rank tier classifier and leaderboard aggregation |
//! | [`payload`] | Validated backend / realtime payloads |
//! | [`config`] | Core configuration |
//! | `feed` | Realtime feed pump (feature `native`) |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `std` | Yes | Standard library support |
//! | `native` | Yes | tokio-backed feed pump and async payment settlement |
//! | `android` | No | `android_logger` backend via [`init_logging`] |
//! | `debug-logs` | No | Per-notification trace logging |

// Crate-level lint configuration: suppress stylistic warnings that don't affect correctness.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::type_complexity,
    clippy::new_without_default
)]

// ── Public modules ──────────────────────────────────────────────────────────

/// Generic keyed observable store and reconciliation policy.
pub mod store;

/// Domain stores built on [`store::KeyedObservableStore`].
pub mod stores;

/// Challenge lifecycle, progress and penalty payment.
pub mod challenge;

/// Rank tiers and leaderboards.
pub mod rank;

/// Backend payload validation.
pub mod payload;

/// Core configuration.
pub mod config;

/// Auth/session collaborator.
pub mod session;

/// Realtime feed pump.
#[cfg(feature = "native")]
pub mod feed;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use challenge::{
    Challenge, ChallengeController, ChallengeError, ChallengeEvent, ChallengeSink,
    ChallengeStatus, Progress, PurchaseOutcome,
};
pub use config::{ConfigError, CoreConfig};
pub use payload::{PayloadError, RemoteEvent, ValidatedEvent};
pub use rank::{aggregate, classify, ChallengeRecord, Leaderboard, LeaderboardEntry, RankTable, RankTier};
pub use session::{LocalSession, SessionProvider};
pub use store::{
    KeyedObservableStore, PendingWrite, ReconcilePolicy, Reconciled, Settlement, StoreError,
    Subscription,
};
pub use stores::Stores;

// ── Library metadata ────────────────────────────────────────────────────────

/// Challenge Core version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string.
pub fn version() -> &'static str {
    VERSION
}

/// Route `log` output to logcat. Safe to call more than once.
#[cfg(feature = "android")]
pub fn init_logging() {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("ChallengeCore"),
    );
    log::info!("Challenge core {} logging initialised", VERSION);
}

// ── Tests ───────────────────────────────────────────────────────────────────
