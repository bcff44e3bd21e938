//! Per-day feedback records, one per `(user, challenge, day)`.

use crate::dates::{is_past_record, normalize_date_only};
use crate::models::{FeedbackRecord, FeedbackRequest};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("practice day must be at least 1")]
    InvalidDay,

    #[error("no feedback to update for challenge {challenge_id} day {practice_day}")]
    NothingToUpdate { challenge_id: u32, practice_day: u32 },

    #[error("feedback for challenge {challenge_id} day {practice_day} is from an earlier day and is read-only")]
    PastRecord { challenge_id: u32, practice_day: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeedbackKey {
    pub user_id: String,
    pub challenge_id: u32,
    pub practice_day: u32,
}

impl FeedbackKey {
    pub fn new(user_id: &str, challenge_id: u32, practice_day: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            challenge_id,
            practice_day,
        }
    }
}

/// Restricts reads to records made on or after the calendar day a run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartFilter {
    pub since: NaiveDate,
    pub frame: FixedOffset,
}

impl StartFilter {
    /// `None` when there is no usable start reference, which means no filtering.
    pub fn from_started_at(started_at: Option<&str>, frame: FixedOffset) -> Option<Self> {
        let since = normalize_date_only(started_at?, &frame)?;
        Some(Self { since, frame })
    }

    pub fn admits(&self, record: &FeedbackRecord) -> bool {
        record.created_at.with_timezone(&self.frame).date_naive() >= self.since
    }
}

/// Which existing record an update may rewrite: one from the current run,
/// made on the client's today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditWindow {
    pub filter: Option<StartFilter>,
    pub today: NaiveDate,
    pub frame: FixedOffset,
}

impl EditWindow {
    pub fn new(started_at: Option<&str>, now: DateTime<Utc>, frame: FixedOffset) -> Self {
        Self {
            filter: StartFilter::from_started_at(started_at, frame),
            today: now.with_timezone(&frame).date_naive(),
            frame,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<FeedbackRecord>", into = "Vec<FeedbackRecord>")]
pub struct FeedbackLedger {
    records: BTreeMap<FeedbackKey, FeedbackRecord>,
}

impl From<Vec<FeedbackRecord>> for FeedbackLedger {
    fn from(records: Vec<FeedbackRecord>) -> Self {
        let mut ledger = Self::default();
        for record in records {
            let key = FeedbackKey::new(&record.user_id, record.challenge_id, record.practice_day);
            match ledger.records.get(&key) {
                Some(existing) if existing.created_at > record.created_at => {}
                _ => {
                    ledger.records.insert(key, record);
                }
            }
        }
        ledger
    }
}

impl From<FeedbackLedger> for Vec<FeedbackRecord> {
    fn from(ledger: FeedbackLedger) -> Self {
        ledger.records.into_values().collect()
    }
}

impl FeedbackLedger {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedbackRecord> {
        self.records.values()
    }

    /// Inserts or replaces the record for the request's day.
    ///
    /// Content fields may all be `None`; the day still counts as completed.
    pub fn submit(
        &mut self,
        user_id: &str,
        request: &FeedbackRequest,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord, LedgerError> {
        if request.practice_day == 0 {
            return Err(LedgerError::InvalidDay);
        }

        let record = FeedbackRecord {
            user_id: user_id.to_string(),
            challenge_id: request.challenge_id,
            practice_day: request.practice_day,
            mood_change: request.mood_change,
            was_helpful: request.was_helpful,
            practice_description: request.practice_description.clone(),
            created_at: now,
            updated_at: None,
        };
        let key = FeedbackKey::new(user_id, request.challenge_id, request.practice_day);
        self.records.insert(key, record.clone());
        Ok(record)
    }

    /// Rewrites the content of an existing record, keeping its creation time.
    ///
    /// A row hidden by the window's start filter counts as missing. A row
    /// made before the window's today is read-only.
    pub fn update(
        &mut self,
        user_id: &str,
        request: &FeedbackRequest,
        window: &EditWindow,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord, LedgerError> {
        let key = FeedbackKey::new(user_id, request.challenge_id, request.practice_day);
        let Some(record) = self
            .records
            .get_mut(&key)
            .filter(|record| window.filter.is_none_or(|filter| filter.admits(record)))
        else {
            return Err(LedgerError::NothingToUpdate {
                challenge_id: request.challenge_id,
                practice_day: request.practice_day,
            });
        };
        if is_past_record(&record.created_at, window.today, &window.frame) {
            return Err(LedgerError::PastRecord {
                challenge_id: request.challenge_id,
                practice_day: request.practice_day,
            });
        }

        record.mood_change = request.mood_change;
        record.was_helpful = request.was_helpful;
        record.practice_description = request.practice_description.clone();
        record.updated_at = Some(now);
        Ok(record.clone())
    }

    /// All records for the pair, ascending by day.
    pub fn history(
        &self,
        user_id: &str,
        challenge_id: u32,
        filter: Option<&StartFilter>,
    ) -> Vec<FeedbackRecord> {
        self.for_challenge(user_id, challenge_id)
            .filter(|record| filter.is_none_or(|filter| filter.admits(record)))
            .cloned()
            .collect()
    }

    pub fn record_for(
        &self,
        user_id: &str,
        challenge_id: u32,
        practice_day: u32,
        filter: Option<&StartFilter>,
    ) -> Option<FeedbackRecord> {
        self.records
            .get(&FeedbackKey::new(user_id, challenge_id, practice_day))
            .filter(|record| filter.is_none_or(|filter| filter.admits(record)))
            .cloned()
    }

    pub fn is_recorded(
        &self,
        user_id: &str,
        challenge_id: u32,
        practice_day: u32,
        filter: Option<&StartFilter>,
    ) -> bool {
        self.record_for(user_id, challenge_id, practice_day, filter)
            .is_some()
    }

    /// Distinct days with a record in the current run.
    pub fn completed_days(
        &self,
        user_id: &str,
        challenge_id: u32,
        filter: Option<&StartFilter>,
    ) -> BTreeSet<u32> {
        self.for_challenge(user_id, challenge_id)
            .filter(|record| filter.is_none_or(|filter| filter.admits(record)))
            .map(|record| record.practice_day)
            .collect()
    }

    fn for_challenge<'a>(
        &'a self,
        user_id: &str,
        challenge_id: u32,
    ) -> impl Iterator<Item = &'a FeedbackRecord> + 'a {
        let start = FeedbackKey::new(user_id, challenge_id, 0);
        let end = FeedbackKey::new(user_id, challenge_id, u32::MAX);
        self.records.range(start..=end).map(|(_, record)| record)
    }
}
