/// Ranking aggregation: challenge records in, ordered standings out.
///
/// 1. Group records by user (first-appearance order).
/// 2. Average elapsed seconds over the user's valid records (those with a
///    start time). Running records end at `now`; finished ones at their
///    recorded end.
/// 3. Success rate = completed / valid * 100, rounded to 2 decimals.
/// 4. Stable sort descending by average time.
/// 5. Rank = 1-based position.
///
/// Users without a single valid record are left out entirely.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::tier::RankTable;
use crate::challenge::{Challenge, ChallengeStatus, SECONDS_PER_DAY};

/// One challenge as seen by the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub status: ChallengeStatus,
    #[serde(rename = "startedAt", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "endedAt", default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ChallengeRecord {
    /// Elapsed seconds, or `None` if the record has no start time.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        let start = self.started_at?;
        let end = if self.status.is_terminal() {
            self.ended_at.unwrap_or(now)
        } else {
            now
        };
        Some((end - start).num_seconds().max(0))
    }
}

impl From<&Challenge> for ChallengeRecord {
    fn from(c: &Challenge) -> Self {
        ChallengeRecord {
            user_id: c.user_id.clone(),
            status: c.status,
            started_at: Some(c.started_at),
            ended_at: c.completed_at.or(c.failed_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Mean elapsed seconds.
    #[serde(rename = "averageTime")]
    pub average_time: f64,
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    #[serde(rename = "challengeCount")]
    pub challenge_count: usize,
    #[serde(rename = "tierTitle")]
    pub tier_title: String,
    #[serde(rename = "tierEmoji")]
    pub tier_emoji: String,
}

impl LeaderboardEntry {
    pub fn average_days(&self) -> f64 {
        self.average_time / SECONDS_PER_DAY as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self, n: usize) -> &[LeaderboardEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    /// 1-based rank of `user_id`, if ranked.
    pub fn position_of(&self, user_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.user_id == user_id)
            .map(|e| e.rank)
    }

    pub fn into_entries(self) -> Vec<LeaderboardEntry> {
        self.entries
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the leaderboard for `records` as of `now`, labelling tiers from `table`.
pub fn aggregate(records: &[ChallengeRecord], now: DateTime<Utc>, table: &RankTable) -> Leaderboard {
    let mut order: Vec<&str> = Vec::new();
    let mut by_user: HashMap<&str, Vec<&ChallengeRecord>> = HashMap::new();
    for record in records {
        let slot = by_user.entry(record.user_id.as_str()).or_insert_with(|| {
            order.push(record.user_id.as_str());
            Vec::new()
        });
        slot.push(record);
    }

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(order.len());
    for user_id in order {
        let user_records = &by_user[user_id];
        let valid: Vec<(i64, &ChallengeRecord)> = user_records
            .iter()
            .filter_map(|r| r.elapsed_secs(now).map(|secs| (secs, *r)))
            .collect();
        if valid.is_empty() {
            log::debug!("leaderboard: {} has no valid records, skipped", user_id);
            continue;
        }

        let total = valid.len();
        let sum: i64 = valid.iter().map(|(secs, _)| *secs).sum();
        let average_time = sum as f64 / total as f64;
        let completed = valid
            .iter()
            .filter(|(_, r)| r.status == ChallengeStatus::Completed)
            .count();
        let tier = table.classify(average_time / SECONDS_PER_DAY as f64);

        entries.push(LeaderboardEntry {
            rank: 0,
            user_id: user_id.to_string(),
            average_time,
            success_rate: round2(completed as f64 / total as f64 * 100.0),
            challenge_count: total,
            tier_title: tier.title.clone(),
            tier_emoji: tier.emoji.clone(),
        });
    }

    // sort_by is stable: equal averages keep input order.
    entries.sort_by(|a, b| b.average_time.total_cmp(&a.average_time));
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }

    Leaderboard { entries }
}
