use crate::analytics::{activity_stats, retention_metrics, ActivityStats, RetentionReport};
use crate::dates::{client_now, resolve_offset};
use crate::errors::AppError;
use crate::events::{Event, EventContext, EventData, PracticeFeedback, PracticeView};
use crate::ledger::{EditWindow, StartFilter};
use crate::models::{
    ChallengeDetail, ChallengeListResponse, FeedbackRecord, FeedbackRequest, FeedbackResponse,
    TodayPractice,
};
use crate::practice::{self, ClientFrame};
use crate::state::AppState;
use crate::storage::{dispatch_events, persist_data};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CLIENT_TIMEZONE_HEADER: &str = "x-client-timezone";
pub const CLIENT_TIME_HEADER: &str = "x-client-time";
pub const STARTED_AT_HEADER: &str = "x-started-at";
pub const SESSION_ID_HEADER: &str = "x-session-id";

const DEFAULT_PERIOD_DAYS: u32 = 7;
const MAX_PERIOD_DAYS: u32 = 365;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeQuery {
    pub challenge_id: Option<String>,
    pub started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    pub challenge_id: Option<String>,
    pub practice_day: Option<String>,
    pub started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

pub async fn today_practice(
    State(state): State<AppState>,
    query: Result<Query<PracticeQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<TodayPractice>, AppError> {
    let Query(query) = query.map_err(query_rejected)?;
    let challenge_id = require_id(query.challenge_id.as_deref(), "challengeId")?;
    let started_at = query
        .started_at
        .or_else(|| header(&headers, STARTED_AT_HEADER))
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("startedAt is required"))?;
    let client = client_frame(&state, &headers);

    let today = {
        let data = state.data.lock().await;
        practice::resolve_today(&data, &client, challenge_id, &started_at)?
    };
    debug!(challenge_id, day = today.practice.day, "resolved today's practice");

    let view = EventData::PracticeView(PracticeView {
        practice_id: Some(today.practice.id),
        challenge_id: Some(challenge_id),
        day: Some(today.practice.day),
    });
    dispatch_events(
        &state,
        vec![Event::new(&event_context(&state, &headers), view, Utc::now())],
    );

    Ok(Json(today))
}

pub async fn list_challenges(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<ChallengeListResponse> {
    let client = client_frame(&state, &headers);
    let data = state.data.lock().await;
    Json(ChallengeListResponse {
        challenges: practice::list_challenges(&data, &client),
    })
}

pub async fn challenge_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ChallengeDetail>, AppError> {
    let challenge_id = require_id(Some(&id), "challenge id")?;
    let started_at = header(&headers, STARTED_AT_HEADER)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("X-Started-At header is required"))?;
    let client = client_frame(&state, &headers);

    let data = state.data.lock().await;
    Ok(Json(practice::challenge_detail(
        &data,
        &client,
        challenge_id,
        &started_at,
    )?))
}

pub async fn feedback_record(
    State(state): State<AppState>,
    query: Result<Query<RecordQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<Option<FeedbackRecord>>, AppError> {
    let Query(query) = query.map_err(query_rejected)?;
    let challenge_id = require_id(query.challenge_id.as_deref(), "challengeId")?;
    let practice_day = require_id(query.practice_day.as_deref(), "practiceDay")?;
    let client = client_frame(&state, &headers);
    let started_at = query.started_at.or_else(|| header(&headers, STARTED_AT_HEADER));
    let filter = StartFilter::from_started_at(started_at.as_deref(), client.offset);

    let data = state.data.lock().await;
    Ok(Json(data.feedback.record_for(
        &client.user_id,
        challenge_id,
        practice_day,
        filter.as_ref(),
    )))
}

pub async fn feedback_history(
    State(state): State<AppState>,
    query: Result<Query<PracticeQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<Vec<FeedbackRecord>>, AppError> {
    let Query(query) = query.map_err(query_rejected)?;
    let challenge_id = require_id(query.challenge_id.as_deref(), "challengeId")?;
    let client = client_frame(&state, &headers);
    let started_at = query.started_at.or_else(|| header(&headers, STARTED_AT_HEADER));
    let filter = StartFilter::from_started_at(started_at.as_deref(), client.offset);

    let data = state.data.lock().await;
    Ok(Json(data.feedback.history(
        &client.user_id,
        challenge_id,
        filter.as_ref(),
    )))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let Json(request) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    let user_id = user_id(&state, &headers);

    let record = {
        let mut data = state.data.lock().await;
        let record = data.feedback.submit(&user_id, &request, Utc::now())?;
        persist_data(&state.config.data_path, &data).await?;
        record
    };
    info!(
        challenge_id = request.challenge_id,
        practice_day = request.practice_day,
        "feedback recorded"
    );

    let payload = PracticeFeedback {
        challenge_id: Some(request.challenge_id),
        practice_day: Some(request.practice_day),
        mood_change: request.mood_change,
        was_helpful: request.was_helpful,
    };
    let context = event_context(&state, &headers);
    let now = Utc::now();
    dispatch_events(
        &state,
        vec![
            Event::new(&context, EventData::PracticeComplete(payload.clone()), now),
            Event::new(&context, EventData::FeedbackSubmit(payload), now),
        ],
    );

    Ok(Json(FeedbackResponse {
        success: true,
        record,
    }))
}

pub async fn update_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let Json(request) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;
    let client = client_frame(&state, &headers);
    let window = EditWindow::new(
        header(&headers, STARTED_AT_HEADER).as_deref(),
        client.now,
        client.offset,
    );

    let mut data = state.data.lock().await;
    let record = data
        .feedback
        .update(&client.user_id, &request, &window, Utc::now())?;
    persist_data(&state.config.data_path, &data).await?;

    Ok(Json(FeedbackResponse {
        success: true,
        record,
    }))
}

pub async fn log_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;

    let Some(data) = EventData::from_parts(&request.event_type, request.event_data) else {
        debug!(event_type = %request.event_type, "ignoring unknown event type");
        return Ok(Json(json!({ "success": true, "ignored": true })));
    };

    let mut event = Event::new(&event_context(&state, &headers), data, Utc::now());
    event.client_timestamp = request.timestamp;

    let mut store = state.data.lock().await;
    store.events.push(event);
    if let Err(err) = persist_data(&state.config.data_path, &store).await {
        warn!(error = %err.message, "failed to persist analytics event");
    }

    Ok(Json(json!({ "success": true })))
}

pub async fn retention(
    State(state): State<AppState>,
    query: Result<Query<PeriodQuery>, QueryRejection>,
) -> Result<Json<RetentionReport>, AppError> {
    let Query(query) = query.map_err(query_rejected)?;
    let now = Utc::now();
    let frame = resolve_offset(Some(&state.config.report_timezone), now);
    let period = query.days.unwrap_or(30).clamp(1, MAX_PERIOD_DAYS);
    let data = state.data.lock().await;
    Ok(Json(retention_metrics(
        &data.events,
        now.with_timezone(&frame).date_naive(),
        &frame,
        period,
    )))
}

pub async fn activity(
    State(state): State<AppState>,
    query: Result<Query<PeriodQuery>, QueryRejection>,
) -> Result<Json<ActivityStats>, AppError> {
    let Query(query) = query.map_err(query_rejected)?;
    let now = Utc::now();
    let frame = resolve_offset(Some(&state.config.report_timezone), now);
    let period = query.days.unwrap_or(DEFAULT_PERIOD_DAYS).clamp(1, MAX_PERIOD_DAYS);
    let data = state.data.lock().await;
    Ok(Json(activity_stats(
        &data.events,
        now.with_timezone(&frame).date_naive(),
        &frame,
        period,
    )))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn user_id(state: &AppState, headers: &HeaderMap) -> String {
    header(headers, USER_ID_HEADER).unwrap_or_else(|| state.config.default_user_id.clone())
}

fn client_frame(state: &AppState, headers: &HeaderMap) -> ClientFrame {
    let now = client_now(header(headers, CLIENT_TIME_HEADER).as_deref());
    // A client clock more than a day off is not trusted.
    let server_now = Utc::now();
    let now = if (now - server_now).abs() > Duration::days(1) {
        server_now
    } else {
        now
    };
    ClientFrame {
        user_id: user_id(state, headers),
        offset: resolve_offset(header(headers, CLIENT_TIMEZONE_HEADER).as_deref(), now),
        now,
    }
}

fn event_context(state: &AppState, headers: &HeaderMap) -> EventContext {
    EventContext {
        user_id: user_id(state, headers),
        session_id: header(headers, SESSION_ID_HEADER),
        user_agent: header(headers, "user-agent"),
        ip_address: header(headers, "cf-connecting-ip")
            .or_else(|| header(headers, "x-forwarded-for"))
            .or_else(|| header(headers, "x-real-ip")),
    }
}

fn query_rejected(err: QueryRejection) -> AppError {
    AppError::bad_request(err.body_text())
}

fn require_id(value: Option<&str>, name: &str) -> Result<u32, AppError> {
    let value = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("{name} is required")))?;
    value
        .parse::<u32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::bad_request(format!("{name} must be a positive integer")))
}
