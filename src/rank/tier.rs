/// Rank tier classifier.
///
/// A [`RankTable`] is an ordered list of day bands covering `[0, ∞)` with no
/// gaps and no overlaps; only the last band is unbounded. Classification floors
/// the average day count and returns the first band containing it.
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{RankError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTier {
    #[serde(rename = "minDays")]
    pub min_days: u32,
    #[serde(rename = "maxDays", default, skip_serializing_if = "Option::is_none")]
    pub max_days: Option<u32>,
    pub title: String,
    pub emoji: String,
}

impl RankTier {
    pub fn new(min_days: u32, max_days: Option<u32>, title: &str, emoji: &str) -> Self {
        RankTier {
            min_days,
            max_days,
            title: title.to_string(),
            emoji: emoji.to_string(),
        }
    }

    pub fn contains(&self, days: u32) -> bool {
        self.min_days <= days && self.max_days.map_or(true, |max| days <= max)
    }

    /// `"🐣 訓練兵"` style label.
    pub fn label(&self) -> String {
        format!("{} {}", self.emoji, self.title)
    }
}

/// Built-in band table.
pub static DEFAULT_RANK_TABLE: Lazy<RankTable> = Lazy::new(|| RankTable {
    bands: vec![
        RankTier::new(0, Some(2), "訓練兵", "🐣"),
        RankTier::new(3, Some(6), "一等兵", "🪖"),
        RankTier::new(7, Some(13), "兵長", "⚔️"),
        RankTier::new(14, Some(29), "伍長", "🎖️"),
        RankTier::new(30, Some(59), "軍曹", "🛡️"),
        RankTier::new(60, Some(89), "曹長", "🏅"),
        RankTier::new(90, Some(179), "少尉", "⭐"),
        RankTier::new(180, Some(364), "大佐", "🌟"),
        RankTier::new(365, Some(729), "将軍", "👑"),
        RankTier::new(730, None, "ナポレオン", "🏆"),
    ],
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RankTier>", into = "Vec<RankTier>")]
pub struct RankTable {
    bands: Vec<RankTier>,
}

impl TryFrom<Vec<RankTier>> for RankTable {
    type Error = RankError;

    fn try_from(bands: Vec<RankTier>) -> Result<Self> {
        RankTable::new(bands)
    }
}

impl From<RankTable> for Vec<RankTier> {
    fn from(table: RankTable) -> Self {
        table.bands
    }
}

impl Default for RankTable {
    fn default() -> Self {
        DEFAULT_RANK_TABLE.clone()
    }
}

/// Whole days from a fractional average. Negative and NaN map to 0; `as`
/// saturates anything above `u32::MAX`.
pub fn floor_days(average_days: f64) -> u32 {
    average_days.floor() as u32
}

impl RankTable {
    /// Validate and build a table.
    pub fn new(bands: Vec<RankTier>) -> Result<Self> {
        let first = bands
            .first()
            .ok_or_else(|| RankError::InvalidTable("no bands".to_string()))?;
        if first.min_days != 0 {
            return Err(RankError::InvalidTable(format!(
                "first band starts at {} instead of 0",
                first.min_days
            )));
        }

        for (i, band) in bands.iter().enumerate() {
            let is_last = i + 1 == bands.len();
            match (band.max_days, is_last) {
                (None, true) => {}
                (None, false) => {
                    return Err(RankError::InvalidTable(format!(
                        "band {:?} is unbounded but not last",
                        band.title
                    )))
                }
                (Some(_), true) => {
                    return Err(RankError::InvalidTable(format!(
                        "last band {:?} must be unbounded",
                        band.title
                    )))
                }
                (Some(max), false) => {
                    if max < band.min_days {
                        return Err(RankError::InvalidTable(format!(
                            "band {:?} ends before it starts",
                            band.title
                        )));
                    }
                    let next = &bands[i + 1];
                    if Some(next.min_days) != max.checked_add(1) {
                        return Err(RankError::InvalidTable(format!(
                            "gap or overlap between {:?} and {:?}",
                            band.title, next.title
                        )));
                    }
                }
            }
        }

        Ok(RankTable { bands })
    }

    pub fn bands(&self) -> &[RankTier] {
        &self.bands
    }

    /// Index of the band for `average_days`. Falls back to 0, which a
    /// validated table never needs.
    pub fn index_of(&self, average_days: f64) -> usize {
        let days = floor_days(average_days);
        self.bands
            .iter()
            .position(|band| band.contains(days))
            .unwrap_or(0)
    }

    /// The tier for `average_days`. Total: always returns exactly one band.
    pub fn classify(&self, average_days: f64) -> &RankTier {
        &self.bands[self.index_of(average_days)]
    }

    /// The band after the one `average_days` falls in, if any.
    pub fn next_tier(&self, average_days: f64) -> Option<&RankTier> {
        self.bands.get(self.index_of(average_days) + 1)
    }

    /// Whole days still needed to reach the next band.
    pub fn days_to_next_tier(&self, average_days: f64) -> Option<u32> {
        let days = floor_days(average_days);
        self.next_tier(average_days)
            .map(|next| next.min_days.saturating_sub(days))
    }
}

/// Classify against the built-in table.
pub fn classify(average_days: f64) -> &'static RankTier {
    DEFAULT_RANK_TABLE.classify(average_days)
}
