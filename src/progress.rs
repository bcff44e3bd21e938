use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// What the percentage was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressBasis {
    /// Elapsed schedule only; used before feedback history is known.
    Calendar,
    /// Days with a feedback record.
    Actual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current_day: u32,
    pub total_days: u32,
    pub progress_percentage: u32,
    pub completed_days: u32,
    pub is_completed: bool,
    pub basis: ProgressBasis,
}

/// Combines the current day with the completed-day set.
///
/// Without a completion set the result is calendar progress. With one, the
/// completed count is capped at `current_day` and completion requires every
/// day to have a record.
pub fn compute_progress(
    total_days: u32,
    current_day: u32,
    completed: Option<&BTreeSet<u32>>,
) -> Progress {
    let total_days = total_days.max(1);
    let current_day = current_day.clamp(1, total_days);

    let Some(completed) = completed else {
        return Progress {
            current_day,
            total_days,
            progress_percentage: percentage(current_day, total_days),
            completed_days: 0,
            is_completed: false,
            basis: ProgressBasis::Calendar,
        };
    };

    let distinct = completed
        .iter()
        .filter(|day| (1..=total_days).contains(*day))
        .count() as u32;
    let completed_days = distinct.min(current_day);

    Progress {
        current_day,
        total_days,
        progress_percentage: percentage(completed_days, total_days),
        completed_days,
        is_completed: completed_days >= total_days,
        basis: ProgressBasis::Actual,
    }
}

fn percentage(part: u32, total: u32) -> u32 {
    ((f64::from(part) / f64::from(total)) * 100.0).round() as u32
}

/// Remembers which challenge runs have already announced completion.
///
/// A run is a `(challenge_id, started_at)` pair, so restarting a challenge
/// can announce again while recomputing the same run cannot.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    announced: HashSet<(u32, String)>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once per run, on the first completed observation.
    pub fn observe(&mut self, challenge_id: u32, started_at: &str, progress: &Progress) -> bool {
        if !progress.is_completed || progress.basis != ProgressBasis::Actual {
            return false;
        }
        self.announced.insert((challenge_id, started_at.to_string()))
    }

    pub fn has_announced(&self, challenge_id: u32, started_at: &str) -> bool {
        self.announced.contains(&(challenge_id, started_at.to_string()))
    }
}
