use crate::dates::normalize_date_only;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

/// Where a challenge sits on its calendar schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Upcoming,
    Current,
    Completed,
}

/// Computes the 1-based day of a challenge, clamped to `[1, total_days]`.
///
/// A server-resolved `override_day` wins over any date arithmetic. When
/// either date is unknown the result is day 1.
pub fn calculate_day(
    start: Option<NaiveDate>,
    today: Option<NaiveDate>,
    total_days: u32,
    override_day: Option<i64>,
) -> u32 {
    let total_days = total_days.max(1);

    if let Some(day) = override_day {
        return clamp_day(day, total_days);
    }

    match (start, today) {
        (Some(start), Some(today)) => clamp_day(raw_day(start, today), total_days),
        _ => 1,
    }
}

/// Same as [`calculate_day`], starting from a raw stored `started_at` value
/// and an instant, both reduced to calendar days in `frame`.
pub fn calculate_day_from_raw(
    started_at: Option<&str>,
    now: DateTime<Utc>,
    frame: &FixedOffset,
    total_days: u32,
    override_day: Option<i64>,
) -> u32 {
    let start = started_at.and_then(|raw| normalize_date_only(raw, frame));
    let today = normalize_date_only(&now, frame);
    calculate_day(start, today, total_days, override_day)
}

pub fn challenge_status(start: Option<NaiveDate>, today: NaiveDate, total_days: u32) -> ChallengeStatus {
    let Some(start) = start else {
        return ChallengeStatus::Current;
    };

    let raw = raw_day(start, today);
    if raw < 1 {
        ChallengeStatus::Upcoming
    } else if raw > i64::from(total_days.max(1)) {
        ChallengeStatus::Completed
    } else {
        ChallengeStatus::Current
    }
}

/// Last scheduled day of a challenge started on `start`.
pub fn challenge_end_date(start: NaiveDate, total_days: u32) -> Option<NaiveDate> {
    if total_days == 0 {
        return None;
    }
    start.checked_add_signed(Duration::days(i64::from(total_days) - 1))
}

fn raw_day(start: NaiveDate, today: NaiveDate) -> i64 {
    (today - start).num_days() + 1
}

fn clamp_day(day: i64, total_days: u32) -> u32 {
    day.clamp(1, i64::from(total_days)) as u32
}
