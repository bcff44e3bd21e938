use crate::challenge_day::{calculate_day, challenge_end_date, challenge_status, ChallengeStatus};
use crate::dates::normalize_date_only;
use crate::errors::AppError;
use crate::events::reconstruct_started_at;
use crate::ledger::StartFilter;
use crate::models::{
    AppData, ChallengeDetail, ChallengeSummary, PracticeStatus, TodayPractice,
};
use crate::progress::compute_progress;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::json;
use std::cmp::Reverse;

/// Who is asking and what their clock says.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    pub user_id: String,
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
}

/// Resolves the practice for the client's current day of a challenge run.
pub fn resolve_today(
    data: &AppData,
    client: &ClientFrame,
    challenge_id: u32,
    started_at: &str,
) -> Result<TodayPractice, AppError> {
    if data.challenge(challenge_id).is_none() {
        return Err(AppError::not_found(format!("challenge {challenge_id} not found")));
    }

    let total_days = data.total_days(challenge_id);
    let start = normalize_date_only(started_at, &client.offset);
    let today = normalize_date_only(&client.now, &client.offset);
    let day = calculate_day(start, today, total_days, None);

    let Some(practice) = data.practice(challenge_id, day) else {
        return Err(missing_practice(data, challenge_id, day));
    };

    let filter = StartFilter::from_started_at(Some(started_at), client.offset);
    let is_recorded =
        data.feedback
            .is_recorded(&client.user_id, challenge_id, day, filter.as_ref());

    Ok(TodayPractice {
        practice: practice.clone(),
        total_days,
        is_recorded,
    })
}

/// All challenges, recommended first, then popular, then newest.
///
/// When the caller has a run for a challenge in the event log, the summary
/// carries the reconstructed start and the day it implies.
pub fn list_challenges(data: &AppData, client: &ClientFrame) -> Vec<ChallengeSummary> {
    let mut summaries: Vec<ChallengeSummary> = data
        .challenges
        .iter()
        .map(|challenge| {
            let total_days = data.total_days(challenge.id);
            let started_at = reconstruct_started_at(&data.events, &client.user_id, challenge.id);
            let current_day = started_at.as_deref().map(|raw| {
                calculate_day(
                    normalize_date_only(raw, &client.offset),
                    normalize_date_only(&client.now, &client.offset),
                    total_days,
                    None,
                )
            });
            ChallengeSummary {
                challenge: challenge.clone(),
                total_days,
                started_at,
                current_day,
            }
        })
        .collect();

    summaries.sort_by_key(|summary| {
        (
            Reverse(summary.challenge.is_recommended),
            Reverse(summary.challenge.is_popular),
            Reverse(summary.challenge.id),
        )
    });
    summaries
}

/// A challenge with its schedule, actual progress and per-day completion.
pub fn challenge_detail(
    data: &AppData,
    client: &ClientFrame,
    challenge_id: u32,
    started_at: &str,
) -> Result<ChallengeDetail, AppError> {
    let Some(challenge) = data.challenge(challenge_id) else {
        return Err(AppError::not_found(format!("challenge {challenge_id} not found")));
    };

    let total_days = data.total_days(challenge_id);
    let start = normalize_date_only(started_at, &client.offset);
    let today = normalize_date_only(&client.now, &client.offset);
    let current_day = calculate_day(start, today, total_days, None);

    let filter = StartFilter::from_started_at(Some(started_at), client.offset);
    let completed = data
        .feedback
        .completed_days(&client.user_id, challenge_id, filter.as_ref());
    let progress = compute_progress(total_days, current_day, Some(&completed));

    let mut practices: Vec<PracticeStatus> = data
        .practices_for(challenge_id)
        .map(|practice| PracticeStatus {
            practice: practice.clone(),
            is_today: practice.day == current_day,
            completed: completed.contains(&practice.day),
        })
        .collect();
    practices.sort_by_key(|status| status.practice.day);

    Ok(ChallengeDetail {
        challenge: challenge.clone(),
        started_at: started_at.to_string(),
        end_date: start.and_then(|start| challenge_end_date(start, total_days)),
        status: today
            .map(|today| challenge_status(start, today, total_days))
            .unwrap_or(ChallengeStatus::Current),
        progress,
        practices,
    })
}

fn missing_practice(data: &AppData, challenge_id: u32, day: u32) -> AppError {
    let days: Vec<u32> = data.practices_for(challenge_id).map(|practice| practice.day).collect();
    AppError::not_found(format!(
        "no practice for challenge {challenge_id} day {day}"
    ))
    .with_details(json!({
        "challenge_id": challenge_id,
        "requested_day": day,
        "available_days": {
            "min": days.iter().min(),
            "max": days.iter().max(),
            "count": days.len(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChallengeSelect, Event, EventContext, EventData};
    use crate::models::{Challenge, FeedbackRequest, Practice};
    use axum::http::StatusCode;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap()
    }

    fn client(user: &str) -> ClientFrame {
        ClientFrame {
            user_id: user.to_string(),
            now: now(),
            offset: FixedOffset::east_opt(9 * 3600).unwrap(),
        }
    }

    fn challenge(id: u32, recommended: bool, popular: bool) -> Challenge {
        Challenge {
            id,
            name: format!("challenge {id}"),
            description: String::new(),
            is_recommended: recommended,
            is_popular: popular,
            created_at: now() - Duration::days(100),
        }
    }

    fn seeded(days: u32) -> AppData {
        let mut data = AppData::default();
        data.challenges.push(challenge(1, false, false));
        for day in 1..=days {
            data.practices.push(Practice {
                id: 100 + day,
                challenge_id: 1,
                day,
                title: format!("practice {day}"),
                description: String::new(),
                category: "mindfulness".into(),
            });
        }
        data
    }

    fn days_ago(days: i64) -> String {
        (now() - Duration::days(days)).to_rfc3339()
    }

    #[test]
    fn resolves_the_practice_for_the_current_day() {
        let data = seeded(31);
        let today = resolve_today(&data, &client("u1"), 1, &days_ago(19)).unwrap();
        assert_eq!(today.practice.day, 20);
        assert_eq!(today.total_days, 31);
        assert!(!today.is_recorded);
    }

    #[test]
    fn quick_complete_marks_today_recorded() {
        let mut data = seeded(7);
        data.feedback
            .submit("u1", &FeedbackRequest::quick_complete(1, 3), now())
            .unwrap();
        let today = resolve_today(&data, &client("u1"), 1, &days_ago(2)).unwrap();
        assert_eq!(today.practice.day, 3);
        assert!(today.is_recorded);
        let other = resolve_today(&data, &client("u2"), 1, &days_ago(2)).unwrap();
        assert!(!other.is_recorded);
    }

    #[test]
    fn stale_record_from_an_earlier_run_is_not_recorded() {
        let mut data = seeded(7);
        data.feedback
            .submit("u1", &FeedbackRequest::quick_complete(1, 1), now() - Duration::days(30))
            .unwrap();
        let today = resolve_today(&data, &client("u1"), 1, &now().to_rfc3339()).unwrap();
        assert_eq!(today.practice.day, 1);
        assert!(!today.is_recorded);
    }

    #[test]
    fn missing_challenge_and_content_gap_are_not_found() {
        let data = seeded(3);
        let err = resolve_today(&data, &client("u1"), 9, &days_ago(0)).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let mut gap = seeded(5);
        gap.practices.retain(|practice| practice.day != 4);
        let err = resolve_today(&gap, &client("u1"), 1, &days_ago(3)).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let details = err.details.unwrap();
        assert_eq!(details["requested_day"], 4);
        assert_eq!(details["available_days"]["max"], 5);
    }

    #[test]
    fn challenges_are_sorted_and_report_total_days() {
        let mut data = seeded(10);
        data.challenges.push(challenge(2, false, true));
        data.challenges.push(challenge(3, true, false));
        data.challenges.push(challenge(4, false, false));

        let list = list_challenges(&data, &client("u1"));
        let ids: Vec<u32> = list.iter().map(|summary| summary.challenge.id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
        assert_eq!(list[3].total_days, 10);
        assert_eq!(list[0].total_days, 1);
        assert!(list.iter().all(|summary| summary.started_at.is_none()));
    }

    #[test]
    fn listing_uses_the_selection_found_in_the_event_log() {
        let mut data = seeded(10);
        let context = EventContext {
            user_id: "u1".into(),
            ..Default::default()
        };
        data.events.push(Event::new(
            &context,
            EventData::ChallengeSelect(ChallengeSelect {
                challenge_id: Some(1),
                started_at: Some(days_ago(4)),
            }),
            now() - Duration::days(4),
        ));

        let list = list_challenges(&data, &client("u1"));
        assert_eq!(list[0].current_day, Some(5));
        let list = list_challenges(&data, &client("u2"));
        assert_eq!(list[0].current_day, None);
    }

    #[test]
    fn detail_reports_actual_progress() {
        let mut data = seeded(10);
        for day in 1..=3 {
            data.feedback
                .submit("u1", &FeedbackRequest::quick_complete(1, day), now())
                .unwrap();
        }
        let detail = challenge_detail(&data, &client("u1"), 1, &days_ago(4)).unwrap();
        assert_eq!(detail.progress.current_day, 5);
        assert_eq!(detail.progress.completed_days, 3);
        assert_eq!(detail.progress.progress_percentage, 30);
        assert!(!detail.progress.is_completed);
        assert_eq!(detail.practices.len(), 10);
        assert!(detail.practices[4].is_today);
        assert!(detail.practices[2].completed);
        assert!(!detail.practices[3].completed);
    }
}
