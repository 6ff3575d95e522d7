/// Derived progress view of a running challenge.
///
/// Achievement is measured in wall-clock seconds (`goal_days * 86400`), never
/// calendar days, so timezone changes cannot move the finish line.
use chrono::{DateTime, Utc};

use super::SECONDS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub elapsed_secs: i64,
    pub goal_secs: i64,
    /// Clamped to `[0, 100]`.
    pub progress_percent: f64,
    pub is_goal_achieved: bool,
}

/// Elapsed time split for the timer display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBreakdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Progress {
    pub fn remaining_secs(&self) -> i64 {
        (self.goal_secs - self.elapsed_secs).max(0)
    }

    pub fn breakdown(&self) -> TimeBreakdown {
        let s = self.elapsed_secs;
        TimeBreakdown {
            days: s / SECONDS_PER_DAY,
            hours: (s % SECONDS_PER_DAY) / 3600,
            minutes: (s % 3600) / 60,
            seconds: s % 60,
        }
    }
}

pub fn compute_progress(goal_days: u32, started_at: DateTime<Utc>, now: DateTime<Utc>) -> Progress {
    // Clock skew can put `now` before the start.
    let elapsed_secs = (now - started_at).num_seconds().max(0);
    let goal_secs = goal_days as i64 * SECONDS_PER_DAY;
    let progress_percent = if goal_secs == 0 {
        100.0
    } else {
        (elapsed_secs as f64 / goal_secs as f64 * 100.0).min(100.0)
    };

    Progress {
        elapsed_secs,
        goal_secs,
        progress_percent,
        is_goal_achieved: elapsed_secs >= goal_secs,
    }
}
