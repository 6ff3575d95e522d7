/// Rank tiers and leaderboards.
///
/// - `tier`: band table and the total, monotonic classifier
/// - `leaderboard`: per-user aggregation of challenge durations
use thiserror::Error;

pub mod leaderboard;
pub mod tier;

pub use leaderboard::{aggregate, ChallengeRecord, Leaderboard, LeaderboardEntry};
pub use tier::{classify, floor_days, RankTable, RankTier, DEFAULT_RANK_TABLE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RankError {
    #[error("Invalid rank table: {0}")]
    InvalidTable(String),
}

pub type Result<T> = std::result::Result<T, RankError>;
