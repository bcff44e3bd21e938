use crate::challenge_day::ChallengeStatus;
use crate::events::Event;
use crate::ledger::FeedbackLedger;
use crate::progress::Progress;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_recommended: bool,
    #[serde(default)]
    pub is_popular: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Practice {
    pub id: u32,
    pub challenge_id: u32,
    pub day: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodChange {
    Improved,
    Same,
    Worse,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WasHelpful {
    Yes,
    No,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub user_id: String,
    pub challenge_id: u32,
    pub practice_day: u32,
    pub mood_change: Option<MoodChange>,
    pub was_helpful: Option<WasHelpful>,
    pub practice_description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Everything the server persists.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppData {
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub practices: Vec<Practice>,
    #[serde(default)]
    pub feedback: FeedbackLedger,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl AppData {
    pub fn challenge(&self, id: u32) -> Option<&Challenge> {
        self.challenges.iter().find(|challenge| challenge.id == id)
    }

    pub fn practices_for(&self, challenge_id: u32) -> impl Iterator<Item = &Practice> {
        self.practices
            .iter()
            .filter(move |practice| practice.challenge_id == challenge_id)
    }

    /// Highest practice day for the challenge, never below 1.
    pub fn total_days(&self, challenge_id: u32) -> u32 {
        self.practices_for(challenge_id)
            .map(|practice| practice.day)
            .max()
            .unwrap_or(1)
            .max(1)
    }

    pub fn practice(&self, challenge_id: u32, day: u32) -> Option<&Practice> {
        self.practices_for(challenge_id)
            .find(|practice| practice.day == day)
    }
}

/// Body of `POST /api/feedback/submit` and `PUT /api/feedback/update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub challenge_id: u32,
    pub practice_day: u32,
    #[serde(default)]
    pub mood_change: Option<MoodChange>,
    #[serde(default)]
    pub was_helpful: Option<WasHelpful>,
    #[serde(default)]
    pub practice_description: Option<String>,
}

impl FeedbackRequest {
    /// A completion with no feedback content.
    pub fn quick_complete(challenge_id: u32, practice_day: u32) -> Self {
        Self {
            challenge_id,
            practice_day,
            mood_change: None,
            was_helpful: None,
            practice_description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub success: bool,
    pub record: FeedbackRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodayPractice {
    #[serde(flatten)]
    pub practice: Practice,
    pub total_days: u32,
    #[serde(rename = "isRecorded")]
    pub is_recorded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSummary {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub total_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_day: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeListResponse {
    pub challenges: Vec<ChallengeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PracticeStatus {
    #[serde(flatten)]
    pub practice: Practice,
    pub is_today: bool,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeDetail {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub started_at: String,
    pub end_date: Option<NaiveDate>,
    pub status: ChallengeStatus,
    #[serde(flatten)]
    pub progress: Progress,
    pub practices: Vec<PracticeStatus>,
}
