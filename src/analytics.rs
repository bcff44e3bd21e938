use crate::dates::date_key;
use crate::events::{Event, EventType};
use chrono::{Duration, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Good,
    NeedsImprovement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Percentage, one decimal place.
    pub value: f64,
    pub target: f64,
    pub status: MetricStatus,
    pub numerator: u64,
    pub denominator: u64,
}

impl Metric {
    fn new(numerator: u64, denominator: u64, target: f64) -> Self {
        let value = if denominator == 0 {
            0.0
        } else {
            (numerator as f64 / denominator as f64 * 1000.0).round() / 10.0
        };
        Self {
            value,
            target,
            status: if value >= target {
                MetricStatus::Good
            } else {
                MetricStatus::NeedsImprovement
            },
            numerator,
            denominator,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionReport {
    pub period_days: u32,
    pub end_date: String,
    pub metrics: BTreeMap<String, Metric>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub activity_date: String,
    pub active_users: u64,
    pub practice_users: u64,
    pub feedback_users: u64,
    pub ai_chat_users: u64,
    pub total_events: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStat {
    pub event_type: EventType,
    pub count: u64,
    pub unique_users: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub unique_users: u64,
    pub avg_visits_per_session: f64,
    pub avg_events_per_session: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub period_days: u32,
    pub daily_active_users: Vec<DailyActivity>,
    pub event_statistics: Vec<EventStat>,
    pub session_statistics: SessionStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub active_users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingWindow {
    pub days: u32,
    pub average_active_users: f64,
    pub peak: Option<DayCount>,
    pub trough: Option<DayCount>,
}

pub const DAY1_RETENTION_TARGET: f64 = 40.0;
pub const DAY7_RETENTION_TARGET: f64 = 20.0;
pub const DAY30_COMPLETION_TARGET: f64 = 10.0;
pub const WEEK1_COMPLETION_TARGET: f64 = 30.0;
pub const PRACTICE_ENGAGEMENT_TARGET: f64 = 50.0;

pub fn event_day(event: &Event, frame: &FixedOffset) -> NaiveDate {
    event.created_at.with_timezone(frame).date_naive()
}

/// Retention and completion rates for the `period_days` ending on `end`.
pub fn retention_metrics(
    events: &[Event],
    end: NaiveDate,
    frame: &FixedOffset,
    period_days: u32,
) -> RetentionReport {
    let period_days = period_days.max(1);
    let start = end - Duration::days(i64::from(period_days) - 1);
    let in_window = |day: NaiveDate| day >= start && day <= end;

    let mut visits: HashMap<&str, BTreeSet<NaiveDate>> = HashMap::new();
    let mut active_days: HashMap<&str, BTreeSet<NaiveDate>> = HashMap::new();
    let mut first_seen: HashMap<&str, NaiveDate> = HashMap::new();
    let mut completions: HashMap<&str, Vec<NaiveDate>> = HashMap::new();

    for event in events {
        let day = event_day(event, frame);
        if day > end {
            continue;
        }
        let user = event.user_id.as_str();
        active_days.entry(user).or_default().insert(day);
        first_seen
            .entry(user)
            .and_modify(|first| *first = (*first).min(day))
            .or_insert(day);

        match event.event_type() {
            EventType::PageVisit if in_window(day) => {
                visits.entry(user).or_default().insert(day);
            }
            EventType::PracticeComplete => completions.entry(user).or_default().push(day),
            _ => {}
        }
    }

    let mut metrics = BTreeMap::new();
    metrics.insert(
        "day1_retention".to_string(),
        return_rate(&visits, end, 1, DAY1_RETENTION_TARGET),
    );
    metrics.insert(
        "day7_retention".to_string(),
        return_rate(&visits, end, 7, DAY7_RETENTION_TARGET),
    );

    let total_users = active_days.len() as u64;
    let thirty_day_users = active_days.values().filter(|days| days.len() >= 30).count() as u64;
    metrics.insert(
        "day30_completion".to_string(),
        Metric::new(thirty_day_users, total_users, DAY30_COMPLETION_TARGET),
    );

    let week_one_completers = first_seen
        .iter()
        .filter(|(user, first)| {
            let week_end = **first + Duration::days(6);
            completions
                .get(**user)
                .is_some_and(|days| days.iter().any(|day| *day >= **first && *day <= week_end))
        })
        .count() as u64;
    metrics.insert(
        "week1_completion".to_string(),
        Metric::new(week_one_completers, total_users, WEEK1_COMPLETION_TARGET),
    );

    let window_users: HashSet<&str> = active_days
        .iter()
        .filter(|(_, days)| days.iter().any(|day| in_window(*day)))
        .map(|(user, _)| *user)
        .collect();
    let engaged = window_users
        .iter()
        .filter(|user| {
            completions
                .get(**user)
                .is_some_and(|days| days.iter().any(|day| in_window(*day)))
        })
        .count() as u64;
    metrics.insert(
        "practice_engagement".to_string(),
        Metric::new(engaged, window_users.len() as u64, PRACTICE_ENGAGEMENT_TARGET),
    );

    RetentionReport {
        period_days,
        end_date: date_key(end),
        metrics,
    }
}

// Users who visited on some day d and again on d + gap, over users who had a
// visit early enough for d + gap to have happened.
fn return_rate(
    visits: &HashMap<&str, BTreeSet<NaiveDate>>,
    end: NaiveDate,
    gap: i64,
    target: f64,
) -> Metric {
    let mut eligible = 0u64;
    let mut returned = 0u64;
    for days in visits.values() {
        let candidates: Vec<&NaiveDate> = days
            .iter()
            .filter(|day| **day + Duration::days(gap) <= end)
            .collect();
        if candidates.is_empty() {
            continue;
        }
        eligible += 1;
        if candidates
            .iter()
            .any(|day| days.contains(&(**day + Duration::days(gap))))
        {
            returned += 1;
        }
    }
    Metric::new(returned, eligible, target)
}

/// Distinct users per feature for one calendar day.
///
/// `active_users` counts `page_visit` users, since every app load logs one.
pub fn daily_activity(events: &[Event], date: NaiveDate, frame: &FixedOffset) -> DailyActivity {
    let mut active: HashSet<&str> = HashSet::new();
    let mut practice: HashSet<&str> = HashSet::new();
    let mut feedback: HashSet<&str> = HashSet::new();
    let mut ai_chat: HashSet<&str> = HashSet::new();
    let mut total_events = 0u64;

    for event in events.iter().filter(|event| event_day(event, frame) == date) {
        total_events += 1;
        let user = event.user_id.as_str();
        match event.event_type() {
            EventType::PageVisit => {
                active.insert(user);
            }
            EventType::PracticeComplete => {
                practice.insert(user);
            }
            EventType::FeedbackSubmit => {
                feedback.insert(user);
            }
            EventType::AiChatStart | EventType::AiChatMessage => {
                ai_chat.insert(user);
            }
            _ => {}
        }
    }

    DailyActivity {
        activity_date: date_key(date),
        active_users: active.len() as u64,
        practice_users: practice.len() as u64,
        feedback_users: feedback.len() as u64,
        ai_chat_users: ai_chat.len() as u64,
        total_events,
    }
}

/// Counts and distinct users per event type within `[start, end]`.
pub fn event_statistics(
    events: &[Event],
    start: NaiveDate,
    end: NaiveDate,
    frame: &FixedOffset,
) -> Vec<EventStat> {
    let mut by_type: BTreeMap<EventType, (u64, HashSet<&str>)> = BTreeMap::new();
    for event in events {
        let day = event_day(event, frame);
        if day < start || day > end {
            continue;
        }
        let entry = by_type.entry(event.event_type()).or_default();
        entry.0 += 1;
        entry.1.insert(event.user_id.as_str());
    }

    let mut stats: Vec<EventStat> = by_type
        .into_iter()
        .map(|(event_type, (count, users))| EventStat {
            event_type,
            count,
            unique_users: users.len() as u64,
        })
        .collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count).then(a.event_type.cmp(&b.event_type)));
    stats
}

pub fn activity_stats(
    events: &[Event],
    end: NaiveDate,
    frame: &FixedOffset,
    period_days: u32,
) -> ActivityStats {
    let period_days = period_days.max(1);
    let start = end - Duration::days(i64::from(period_days) - 1);

    let daily_active_users = (0..period_days)
        .map(|offset| daily_activity(events, end - Duration::days(i64::from(offset)), frame))
        .collect();

    let mut sessions: HashMap<&str, (u64, u64)> = HashMap::new();
    let mut users: HashSet<&str> = HashSet::new();
    for event in events {
        let day = event_day(event, frame);
        if day < start || day > end {
            continue;
        }
        users.insert(event.user_id.as_str());
        if let Some(session) = event.session_id.as_deref() {
            let entry = sessions.entry(session).or_default();
            entry.1 += 1;
            if event.event_type() == EventType::PageVisit {
                entry.0 += 1;
            }
        }
    }

    let total_sessions = sessions.len() as u64;
    let (visits, session_events) = sessions
        .values()
        .fold((0u64, 0u64), |acc, (visits, count)| (acc.0 + visits, acc.1 + count));
    let denom = if total_sessions == 0 { 1.0 } else { total_sessions as f64 };

    ActivityStats {
        period_days,
        daily_active_users,
        event_statistics: event_statistics(events, start, end, frame),
        session_statistics: SessionStats {
            total_sessions,
            unique_users: users.len() as u64,
            avg_visits_per_session: visits as f64 / denom,
            avg_events_per_session: session_events as f64 / denom,
        },
    }
}

/// Average daily active users over the `days` ending on `end`, with the
/// busiest and quietest day.
pub fn trailing_window(
    events: &[Event],
    end: NaiveDate,
    frame: &FixedOffset,
    days: u32,
) -> TrailingWindow {
    let days = days.max(1);
    let series: Vec<DayCount> = (0..days)
        .rev()
        .map(|offset| {
            let date = end - Duration::days(i64::from(offset));
            DayCount {
                date: date_key(date),
                active_users: daily_activity(events, date, frame).active_users,
            }
        })
        .collect();

    let total: u64 = series.iter().map(|day| day.active_users).sum();
    // Earliest day wins ties.
    let peak = series
        .iter()
        .rev()
        .max_by_key(|day| day.active_users)
        .cloned();
    let trough = series
        .iter()
        .min_by_key(|day| day.active_users)
        .cloned();

    TrailingWindow {
        days,
        average_active_users: (total as f64 / f64::from(days) * 10.0).round() / 10.0,
        peak,
        trough,
    }
}
