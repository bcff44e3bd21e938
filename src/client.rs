//! The client side of the API: what the web app does on every load.
//!
//! It re-derives the challenge day and progress with the same functions the
//! server uses, so its optimistic values match the server's whenever both
//! see the same start reference, timezone and clock.

use crate::challenge_day::calculate_day_from_raw;
use crate::dates::resolve_offset;
use crate::events::{ChallengeRef, EventData};
use crate::handlers::{
    CLIENT_TIME_HEADER, CLIENT_TIMEZONE_HEADER, SESSION_ID_HEADER, STARTED_AT_HEADER,
    USER_ID_HEADER,
};
use crate::models::{
    Challenge, ChallengeListResponse, ChallengeSummary, FeedbackRecord, FeedbackRequest,
    FeedbackResponse, Practice, TodayPractice,
};
use crate::progress::{compute_progress, CompletionTracker, Progress};
use crate::selection::{KeyValueStore, SelectionStore, StoreError};
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded {status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClientError {
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status(),
            Self::Store(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    user_id: String,
    timezone: String,
    session_id: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            user_id: user_id.into(),
            timezone: timezone.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub async fn today_practice(&self, challenge_id: u32, started_at: &str) -> Result<TodayPractice, ClientError> {
        let request = self
            .request(Method::GET, "/api/practice/today")
            .query(&[("challengeId", challenge_id.to_string())])
            .header(STARTED_AT_HEADER, started_at);
        send(request).await
    }

    pub async fn challenges(&self) -> Result<Vec<ChallengeSummary>, ClientError> {
        let list: ChallengeListResponse = send(self.request(Method::GET, "/api/challenges")).await?;
        Ok(list.challenges)
    }

    pub async fn feedback_history(
        &self,
        challenge_id: u32,
        started_at: Option<&str>,
    ) -> Result<Vec<FeedbackRecord>, ClientError> {
        let mut request = self
            .request(Method::GET, "/api/feedback/history")
            .query(&[("challengeId", challenge_id.to_string())]);
        if let Some(started_at) = started_at {
            request = request.header(STARTED_AT_HEADER, started_at);
        }
        send(request).await
    }

    pub async fn feedback_record(
        &self,
        challenge_id: u32,
        practice_day: u32,
        started_at: Option<&str>,
    ) -> Result<Option<FeedbackRecord>, ClientError> {
        let mut request = self.request(Method::GET, "/api/feedback/record").query(&[
            ("challengeId", challenge_id.to_string()),
            ("practiceDay", practice_day.to_string()),
        ]);
        if let Some(started_at) = started_at {
            request = request.header(STARTED_AT_HEADER, started_at);
        }
        send(request).await
    }

    pub async fn submit_feedback(&self, feedback: &FeedbackRequest) -> Result<FeedbackResponse, ClientError> {
        send(self.request(Method::POST, "/api/feedback/submit").json(feedback)).await
    }

    /// Edits today's record of the current run. The server answers 409 for a
    /// record made on an earlier day and 404 for one from another run.
    pub async fn update_feedback(
        &self,
        feedback: &FeedbackRequest,
        started_at: Option<&str>,
    ) -> Result<FeedbackResponse, ClientError> {
        let mut request = self.request(Method::PUT, "/api/feedback/update").json(feedback);
        if let Some(started_at) = started_at {
            request = request.header(STARTED_AT_HEADER, started_at);
        }
        send(request).await
    }

    /// Sends an analytics event without waiting for it. Failures are logged.
    pub fn log_event(&self, data: EventData) {
        let request = match serde_json::to_value(&data) {
            Ok(body) => self.request(Method::POST, "/api/analytics/event").json(&json!({
                "event_type": body["event_type"],
                "event_data": body["event_data"],
                "timestamp": Utc::now().to_rfc3339(),
            })),
            Err(err) => {
                debug!(error = %err, "could not encode analytics event");
                return;
            }
        };

        tokio::spawn(async move {
            if let Err(err) = request.send().await.and_then(|r| r.error_for_status()) {
                debug!(error = %err, "analytics event logging failed");
            }
        });
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header(USER_ID_HEADER, &self.user_id)
            .header(CLIENT_TIMEZONE_HEADER, &self.timezone)
            .header(CLIENT_TIME_HEADER, Utc::now().to_rfc3339());
        if let Some(session) = &self.session_id {
            builder = builder.header(SESSION_ID_HEADER, session);
        }
        builder
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<serde_json::Value>().await {
            Ok(body) => body["error"].as_str().unwrap_or_default().to_string(),
            Err(_) => String::new(),
        };
        return Err(ClientError::Status { status, message });
    }
    Ok(response.json().await?)
}

/// What the home screen shows for the selected challenge.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub challenge: ChallengeSummary,
    pub practice: TodayPractice,
    pub started_at: String,
    pub progress: Progress,
    /// The challenge list failed or did not contain the selection.
    pub fallback_challenge: bool,
    /// The practice fetch failed.
    pub fallback_practice: bool,
    /// This load was the first to see the run completed.
    pub completion_announced: bool,
}

/// Loads the selected challenge, today's practice and progress.
///
/// Returns `Ok(None)` when nothing usable is selected or `cancel` fires
/// before the load finishes; nothing is announced in that case.
pub async fn load_dashboard<S: KeyValueStore>(
    api: &ApiClient,
    selection: &SelectionStore<S>,
    tracker: &mut CompletionTracker,
    cancel: &CancellationToken,
) -> Result<Option<Dashboard>, ClientError> {
    let Some(current) = selection.get_selection() else {
        return Ok(None);
    };
    let Ok(challenge_id) = current.challenge_id.trim().parse::<u32>() else {
        warn!(challenge_id = %current.challenge_id, "stored challenge id is not numeric");
        return Ok(None);
    };
    let started_at = selection.validate_and_fix_started_at(&current.challenge_id, None, Utc::now())?;

    let fetches = async {
        tokio::join!(
            api.today_practice(challenge_id, &started_at),
            api.challenges()
        )
    };
    let (practice_result, challenges_result) = tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        results = fetches => results,
    };

    let now = Utc::now();
    let offset = resolve_offset(Some(api.timezone()), now);

    let listed = match challenges_result {
        Ok(list) => list.into_iter().find(|summary| summary.challenge.id == challenge_id),
        Err(err) => {
            warn!(error = %err, "challenge list unavailable");
            None
        }
    };
    let served = match practice_result {
        Ok(practice) => Some(practice),
        Err(err) => {
            warn!(error = %err, "today's practice unavailable");
            None
        }
    };

    let total_days = listed
        .as_ref()
        .map(|summary| summary.total_days)
        .or_else(|| served.as_ref().map(|practice| practice.total_days))
        .unwrap_or(1);
    let current_day = calculate_day_from_raw(
        Some(&started_at),
        now,
        &offset,
        total_days,
        served.as_ref().map(|practice| i64::from(practice.practice.day)),
    );

    let fallback_challenge = listed.is_none();
    let fallback_practice = served.is_none();
    let challenge = listed.unwrap_or_else(|| default_challenge(challenge_id, total_days));
    let practice = served.unwrap_or_else(|| default_practice(challenge_id, current_day, total_days));

    let history = tokio::select! {
        _ = cancel.cancelled() => return Ok(None),
        history = api.feedback_history(challenge_id, Some(&started_at)) => history,
    };
    let progress = match history {
        Ok(records) => {
            let days: BTreeSet<u32> = records.iter().map(|record| record.practice_day).collect();
            compute_progress(total_days, current_day, Some(&days))
        }
        Err(err) => {
            warn!(error = %err, "feedback history unavailable, showing calendar progress");
            compute_progress(total_days, current_day, None)
        }
    };

    let completion_announced = tracker.observe(challenge_id, &started_at, &progress);
    if completion_announced {
        api.log_event(EventData::ChallengeComplete(ChallengeRef {
            challenge_id: Some(challenge_id),
        }));
    }

    Ok(Some(Dashboard {
        challenge,
        practice,
        started_at,
        progress,
        fallback_challenge,
        fallback_practice,
        completion_announced,
    }))
}

pub fn default_challenge(challenge_id: u32, total_days: u32) -> ChallengeSummary {
    ChallengeSummary {
        challenge: Challenge {
            id: challenge_id,
            name: "My challenge".to_string(),
            description: String::new(),
            is_recommended: false,
            is_popular: false,
            created_at: Utc::now(),
        },
        total_days,
        started_at: None,
        current_day: None,
    }
}

pub fn default_practice(challenge_id: u32, day: u32, total_days: u32) -> TodayPractice {
    TodayPractice {
        practice: Practice {
            id: 0,
            challenge_id,
            day,
            title: "Take a mindful breath".to_string(),
            description: "Close your eyes for three minutes and follow your breathing. \
                          When a thought appears, notice it and return to the breath."
                .to_string(),
            category: "mindfulness".to_string(),
        },
        total_days,
        is_recorded: false,
    }
}
