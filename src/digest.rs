//! Daily analytics digest posted to a chat webhook.

use crate::analytics::{
    daily_activity, event_statistics, retention_metrics, trailing_window, DailyActivity,
    EventStat, MetricStatus, RetentionReport, TrailingWindow,
};
use crate::dates::{date_key, resolve_offset};
use crate::events::Event;
use crate::state::AppState;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write as _;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RETENTION_PERIOD_DAYS: u32 = 30;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook responded with {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestReport {
    pub target_date: String,
    pub retention: RetentionReport,
    pub activity: DailyActivity,
    pub events: Vec<EventStat>,
    pub trailing_7: TrailingWindow,
    pub trailing_30: TrailingWindow,
    pub warnings: Vec<String>,
}

pub fn build_digest(events: &[Event], target: NaiveDate, frame: &FixedOffset) -> DigestReport {
    let activity = daily_activity(events, target, frame);
    let warnings = consistency_warnings(&activity);

    DigestReport {
        target_date: date_key(target),
        retention: retention_metrics(events, target, frame, RETENTION_PERIOD_DAYS),
        events: event_statistics(events, target, target, frame),
        trailing_7: trailing_window(events, target, frame, 7),
        trailing_30: trailing_window(events, target, frame, 30),
        activity,
        warnings,
    }
}

/// Every feature user also loads the app, so no feature may have more
/// distinct users than `page_visit` on the same day.
pub fn consistency_warnings(activity: &DailyActivity) -> Vec<String> {
    [
        ("practice", activity.practice_users),
        ("feedback", activity.feedback_users),
        ("ai chat", activity.ai_chat_users),
    ]
    .into_iter()
    .filter(|(_, users)| *users > activity.active_users)
    .map(|(feature, users)| {
        format!(
            "{feature} users ({users}) exceed active users ({}) on {}",
            activity.active_users, activity.activity_date
        )
    })
    .collect()
}

pub fn format_message(report: &DigestReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📊 Daily digest for {}", report.target_date);
    let _ = writeln!(out);

    let activity = &report.activity;
    let _ = writeln!(out, "*Activity*");
    let _ = writeln!(out, "• active users: {}", activity.active_users);
    let _ = writeln!(out, "• practice users: {}", activity.practice_users);
    let _ = writeln!(out, "• feedback users: {}", activity.feedback_users);
    let _ = writeln!(out, "• ai chat users: {}", activity.ai_chat_users);
    let _ = writeln!(out, "• events: {}", activity.total_events);
    let _ = writeln!(out);

    let _ = writeln!(out, "*Trends*");
    for window in [&report.trailing_7, &report.trailing_30] {
        let _ = write!(
            out,
            "• {}-day avg: {:.1}",
            window.days, window.average_active_users
        );
        if let (Some(peak), Some(trough)) = (&window.peak, &window.trough) {
            let _ = write!(
                out,
                " (peak {} on {}, low {} on {})",
                peak.active_users, peak.date, trough.active_users, trough.date
            );
        }
        let _ = writeln!(out);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "*Retention ({} days)*", report.retention.period_days);
    for (name, metric) in &report.retention.metrics {
        let mark = match metric.status {
            MetricStatus::Good => "✅",
            MetricStatus::NeedsImprovement => "⚠️",
        };
        let _ = writeln!(
            out,
            "• {mark} {name}: {:.1}% (target {:.0}%)",
            metric.value, metric.target
        );
    }

    if !report.events.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "*Events*");
        for stat in &report.events {
            let _ = writeln!(
                out,
                "• {}: {} ({} users)",
                stat.event_type.as_str(),
                stat.count,
                stat.unique_users
            );
        }
    }

    if !report.warnings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "*Consistency warnings*");
        for warning in &report.warnings {
            let _ = writeln!(out, "• {warning}");
        }
    }

    out
}

pub async fn post_webhook(
    http: &reqwest::Client,
    url: &str,
    text: &str,
) -> Result<(), DigestError> {
    let response = http.post(url).json(&json!({ "text": text })).send().await?;
    if !response.status().is_success() {
        return Err(DigestError::Status(response.status()));
    }
    Ok(())
}

/// Builds the digest for the report-local day before `now` and delivers it.
pub async fn run_digest(state: &AppState, now: DateTime<Utc>) -> Result<DigestReport, DigestError> {
    let frame = resolve_offset(Some(&state.config.report_timezone), now);
    let target = now.with_timezone(&frame).date_naive() - Duration::days(1);

    let events = state.data.lock().await.events.clone();
    let report = build_digest(&events, target, &frame);
    for warning in &report.warnings {
        warn!(%warning, "digest consistency check failed");
    }

    match state.config.webhook_url.as_deref() {
        Some(url) => {
            post_webhook(&state.http, url, &format_message(&report)).await?;
            info!(date = %report.target_date, "daily digest delivered");
        }
        None => info!(date = %report.target_date, "no webhook configured, digest not delivered"),
    }

    Ok(report)
}

/// Runs the digest and, if it fails, tries once to say so on the webhook.
pub async fn run_digest_job(state: &AppState, now: DateTime<Utc>) {
    let Err(err) = run_digest(state, now).await else {
        return;
    };
    error!(error = %err, "daily digest failed");

    let Some(url) = state.config.webhook_url.as_deref() else {
        return;
    };
    let alert = format!("🚨 Daily digest job failed: {err}");
    if let Err(alert_err) = post_webhook(&state.http, url, &alert).await {
        error!(error = %alert_err, "failed to send digest failure alert");
    }
}

/// Time from `now` until the next `hour:00` in `frame`.
pub fn until_next_run(now: DateTime<Utc>, hour: u32, frame: &FixedOffset) -> std::time::Duration {
    let local = now.with_timezone(frame).naive_local();
    let Some(mut next) = local.date().and_hms_opt(hour.min(23), 0, 0) else {
        return std::time::Duration::ZERO;
    };
    if next <= local {
        next += Duration::days(1);
    }
    (next - local).to_std().unwrap_or(std::time::Duration::ZERO)
}

pub fn spawn_scheduler(state: AppState, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let frame = resolve_offset(Some(&state.config.report_timezone), now);
            let wait = until_next_run(now, state.config.digest_hour, &frame);
            info!(seconds = wait.as_secs(), "next daily digest scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("digest scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    run_digest_job(&state, Utc::now()).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventContext, EventData, PageVisit, PracticeFeedback};
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn event(user: &str, data: EventData, date: NaiveDate) -> Event {
        let context = EventContext {
            user_id: user.into(),
            ..Default::default()
        };
        Event::new(&context, data, Utc.from_utc_datetime(&date.and_hms_opt(10, 0, 0).unwrap()))
    }

    #[test]
    fn flags_more_practice_users_than_visitors() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
        let events = vec![
            event("a", EventData::PageVisit(PageVisit::default()), date),
            event("a", EventData::PracticeComplete(PracticeFeedback::default()), date),
            event("b", EventData::PracticeComplete(PracticeFeedback::default()), date),
        ];
        let report = build_digest(&events, date, &utc());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("practice users (2) exceed active users (1)"));

        let message = format_message(&report);
        assert!(message.contains("Consistency warnings"));
        assert!(message.contains("practice_complete: 2 (2 users)"));
    }

    #[test]
    fn consistent_day_has_no_warnings() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
        let events = vec![
            event("a", EventData::PageVisit(PageVisit::default()), date),
            event("a", EventData::FeedbackSubmit(PracticeFeedback::default()), date),
        ];
        let report = build_digest(&events, date, &utc());
        assert!(report.warnings.is_empty());
        assert!(!format_message(&report).contains("Consistency warnings"));
    }

    #[test]
    fn empty_log_still_produces_a_digest() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
        let report = build_digest(&[], date, &utc());
        assert_eq!(report.activity.active_users, 0);
        assert_eq!(report.trailing_30.days, 30);
        assert!(format_message(&report).contains("Daily digest for 2026-04-02"));
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        // 08:00 KST
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 23, 0, 0).unwrap();
        assert_eq!(until_next_run(now, 9, &kst).as_secs(), 3600);
        // 10:00 KST, so the next run is tomorrow
        let now = Utc.with_ymd_and_hms(2026, 4, 2, 1, 0, 0).unwrap();
        assert_eq!(until_next_run(now, 9, &kst).as_secs(), 23 * 3600);
    }

    type Received = std::sync::Arc<tokio::sync::Mutex<Vec<String>>>;

    // Collects the `text` of every post and answers with `status`.
    async fn stub_webhook(status: axum::http::StatusCode) -> (String, Received) {
        use axum::{extract::State, routing::post, Json, Router};

        let received = Received::default();
        let hook = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Received>, Json(body): Json<serde_json::Value>| async move {
                        let text = body["text"].as_str().unwrap_or_default().to_string();
                        received.lock().await.push(text);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, hook).await.unwrap();
        });
        (format!("http://{addr}/hook"), received)
    }

    fn state_with_webhook(url: Option<String>) -> AppState {
        let config = crate::config::Config {
            webhook_url: url,
            report_timezone: "UTC".into(),
            ..Default::default()
        };
        let data = crate::models::AppData {
            events: vec![event(
                "a",
                EventData::PageVisit(PageVisit::default()),
                NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
            )],
            ..Default::default()
        };
        AppState::new(config, data)
    }

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 3, 0, 5, 0).unwrap()
    }

    #[tokio::test]
    async fn delivers_yesterdays_digest_to_the_webhook() {
        let (url, received) = stub_webhook(axum::http::StatusCode::OK).await;
        let state = state_with_webhook(Some(url));

        let report = run_digest(&state, run_time()).await.unwrap();
        assert_eq!(report.target_date, "2026-04-02");

        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert!(received[0].contains("Daily digest for 2026-04-02"));
        assert!(received[0].contains("active users: 1"));
    }

    #[tokio::test]
    async fn rejected_delivery_is_a_status_error() {
        let (url, received) = stub_webhook(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;
        let state = state_with_webhook(Some(url));

        let err = run_digest(&state, run_time()).await.unwrap_err();
        assert!(matches!(
            err,
            DigestError::Status(status) if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(received.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_job_sends_one_alert() {
        let (url, received) = stub_webhook(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;
        let state = state_with_webhook(Some(url));

        run_digest_job(&state, run_time()).await;

        let received = received.lock().await;
        assert_eq!(received.len(), 2);
        assert!(received[0].contains("Daily digest for 2026-04-02"));
        let alerts: Vec<&String> = received
            .iter()
            .filter(|text| text.contains("job failed"))
            .collect();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("500"));
    }

    #[tokio::test]
    async fn without_a_webhook_the_digest_is_only_built() {
        let state = state_with_webhook(None);
        let report = run_digest(&state, run_time()).await.unwrap();
        assert_eq!(report.activity.active_users, 1);
        run_digest_job(&state, run_time()).await;
    }
}
