/// Core configuration.
///
/// Everything here is optional on the wire; missing fields fall back to the
/// built-in defaults so an empty `{}` is a valid config.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::challenge::payment::DEFAULT_LEDGER_CAPACITY;
use crate::rank::{RankError, RankTable, RankTier};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Rank(#[from] RankError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_FALLBACK_DISPLAY_NAME: &str = "名無し";

pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    /// Replacement rank table. `None` uses the built-in ten tiers.
    pub rank_bands: Option<Vec<RankTier>>,
    /// How many settled payment transaction ids are remembered.
    pub payment_replay_capacity: usize,
    /// Terminal challenges kept in memory before the oldest are dropped.
    pub history_capacity: usize,
    /// Shown for authors whose profile has no display name.
    pub fallback_display_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            rank_bands: None,
            payment_replay_capacity: DEFAULT_LEDGER_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            fallback_display_name: DEFAULT_FALLBACK_DISPLAY_NAME.to_string(),
        }
    }
}

impl CoreConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CoreConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        // Surface a bad table at load time rather than at first ranking.
        config.rank_table()?;
        log::info!(
            "✓ Config loaded (custom rank table: {})",
            config.rank_bands.is_some()
        );
        Ok(config)
    }

    pub fn rank_table(&self) -> Result<RankTable> {
        match &self.rank_bands {
            Some(bands) => Ok(RankTable::new(bands.clone())?),
            None => Ok(RankTable::default()),
        }
    }
}
