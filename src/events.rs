//! Append-only analytics events.
//!
//! Every accepted event type has its own payload shape. Incoming events are
//! checked against [`EventType::ALL`]; unknown types are dropped without an
//! error so that older or newer clients never see failures from analytics.

use crate::models::{MoodChange, WasHelpful};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageVisit,
    PracticeView,
    PracticeComplete,
    FeedbackSubmit,
    AiChatStart,
    AiChatMessage,
    ChallengeComplete,
    ChallengeSelect,
    OnboardingComplete,
    TimefoldEnvelopeCreate,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        Self::PageVisit,
        Self::PracticeView,
        Self::PracticeComplete,
        Self::FeedbackSubmit,
        Self::AiChatStart,
        Self::AiChatMessage,
        Self::ChallengeComplete,
        Self::ChallengeSelect,
        Self::OnboardingComplete,
        Self::TimefoldEnvelopeCreate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageVisit => "page_visit",
            Self::PracticeView => "practice_view",
            Self::PracticeComplete => "practice_complete",
            Self::FeedbackSubmit => "feedback_submit",
            Self::AiChatStart => "ai_chat_start",
            Self::AiChatMessage => "ai_chat_message",
            Self::ChallengeComplete => "challenge_complete",
            Self::ChallengeSelect => "challenge_select",
            Self::OnboardingComplete => "onboarding_complete",
            Self::TimefoldEnvelopeCreate => "timefold_envelope_create",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == value.trim())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageVisit {
    pub page: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeView {
    #[serde(deserialize_with = "lenient_id")]
    pub practice_id: Option<u32>,
    #[serde(deserialize_with = "lenient_id")]
    pub challenge_id: Option<u32>,
    #[serde(deserialize_with = "lenient_id")]
    pub day: Option<u32>,
}

/// Shared by `practice_complete` and `feedback_submit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeFeedback {
    #[serde(deserialize_with = "lenient_id")]
    pub challenge_id: Option<u32>,
    #[serde(deserialize_with = "lenient_id")]
    pub practice_day: Option<u32>,
    pub mood_change: Option<MoodChange>,
    pub was_helpful: Option<WasHelpful>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub message_length: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeRef {
    #[serde(deserialize_with = "lenient_id")]
    pub challenge_id: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSelect {
    #[serde(deserialize_with = "lenient_id")]
    pub challenge_id: Option<u32>,
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeCreate {
    #[serde(deserialize_with = "lenient_id")]
    pub challenge_id: Option<u32>,
    pub unlock_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoData {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "event_data", rename_all = "snake_case")]
pub enum EventData {
    PageVisit(PageVisit),
    PracticeView(PracticeView),
    PracticeComplete(PracticeFeedback),
    FeedbackSubmit(PracticeFeedback),
    AiChatStart(NoData),
    AiChatMessage(ChatMessage),
    ChallengeComplete(ChallengeRef),
    ChallengeSelect(ChallengeSelect),
    OnboardingComplete(NoData),
    TimefoldEnvelopeCreate(EnvelopeCreate),
}

impl EventData {
    /// Validates a raw `(event_type, event_data)` pair from a client.
    ///
    /// `None` means the type is not on the allow-list. A known type with a
    /// malformed payload keeps the type and falls back to an empty payload.
    pub fn from_parts(event_type: &str, data: Value) -> Option<Self> {
        let kind = EventType::parse(event_type)?;
        let data = match data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let tagged = serde_json::json!({ "event_type": kind.as_str(), "event_data": data });
        Some(serde_json::from_value(tagged).unwrap_or_else(|_| Self::empty(kind)))
    }

    pub fn empty(kind: EventType) -> Self {
        match kind {
            EventType::PageVisit => Self::PageVisit(PageVisit::default()),
            EventType::PracticeView => Self::PracticeView(PracticeView::default()),
            EventType::PracticeComplete => Self::PracticeComplete(PracticeFeedback::default()),
            EventType::FeedbackSubmit => Self::FeedbackSubmit(PracticeFeedback::default()),
            EventType::AiChatStart => Self::AiChatStart(NoData::default()),
            EventType::AiChatMessage => Self::AiChatMessage(ChatMessage::default()),
            EventType::ChallengeComplete => Self::ChallengeComplete(ChallengeRef::default()),
            EventType::ChallengeSelect => Self::ChallengeSelect(ChallengeSelect::default()),
            EventType::OnboardingComplete => Self::OnboardingComplete(NoData::default()),
            EventType::TimefoldEnvelopeCreate => {
                Self::TimefoldEnvelopeCreate(EnvelopeCreate::default())
            }
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::PageVisit(_) => EventType::PageVisit,
            Self::PracticeView(_) => EventType::PracticeView,
            Self::PracticeComplete(_) => EventType::PracticeComplete,
            Self::FeedbackSubmit(_) => EventType::FeedbackSubmit,
            Self::AiChatStart(_) => EventType::AiChatStart,
            Self::AiChatMessage(_) => EventType::AiChatMessage,
            Self::ChallengeComplete(_) => EventType::ChallengeComplete,
            Self::ChallengeSelect(_) => EventType::ChallengeSelect,
            Self::OnboardingComplete(_) => EventType::OnboardingComplete,
            Self::TimefoldEnvelopeCreate(_) => EventType::TimefoldEnvelopeCreate,
        }
    }

    /// The challenge this event is about, when it names one.
    pub fn challenge_id(&self) -> Option<u32> {
        match self {
            Self::PracticeView(data) => data.challenge_id,
            Self::PracticeComplete(data) | Self::FeedbackSubmit(data) => data.challenge_id,
            Self::ChallengeComplete(data) => data.challenge_id,
            Self::ChallengeSelect(data) => data.challenge_id,
            Self::TimefoldEnvelopeCreate(data) => data.challenge_id,
            Self::PageVisit(_)
            | Self::AiChatStart(_)
            | Self::AiChatMessage(_)
            | Self::OnboardingComplete(_) => None,
        }
    }
}

/// Request metadata attached to every stored event.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub user_id: String,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    #[serde(flatten)]
    pub data: EventData,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub client_timestamp: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(context: &EventContext, data: EventData, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: context.user_id.clone(),
            data,
            session_id: context.session_id.clone(),
            user_agent: context.user_agent.clone(),
            ip_address: context.ip_address.as_deref().and_then(mask_ip),
            client_timestamp: None,
            created_at,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.data.event_type()
    }
}

/// Drops the host part of an address: the last IPv4 octet, or everything
/// after the first three IPv6 groups.
pub fn mask_ip(raw: &str) -> Option<String> {
    let first = raw.split(',').next()?.trim();
    match first.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            Some(format!("{a}.{b}.{c}.0"))
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            Some(format!(
                "{:x}:{:x}:{:x}::",
                segments[0], segments[1], segments[2]
            ))
        }
    }
}

/// Best guess at when `user_id` started `challenge_id`, from the log alone.
///
/// Prefers the latest `challenge_select` event (its reported `started_at`,
/// else its timestamp); otherwise the earliest event naming the challenge.
pub fn reconstruct_started_at(events: &[Event], user_id: &str, challenge_id: u32) -> Option<String> {
    let mine = events
        .iter()
        .filter(|event| event.user_id == user_id && event.data.challenge_id() == Some(challenge_id));

    let latest_select = mine
        .clone()
        .filter_map(|event| match &event.data {
            EventData::ChallengeSelect(select) => Some((event.created_at, select.started_at.clone())),
            _ => None,
        })
        .max_by_key(|(created_at, _)| *created_at);

    if let Some((created_at, started_at)) = latest_select {
        return Some(started_at.unwrap_or_else(|| created_at.to_rfc3339()));
    }

    mine.map(|event| event.created_at)
        .min()
        .map(|created_at| created_at.to_rfc3339())
}

// Browsers keep challenge ids as strings, so accept "3" as well as 3.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn context(user: &str) -> EventContext {
        EventContext {
            user_id: user.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(EventData::from_parts("session_end", json!({})).is_none());
        assert!(EventData::from_parts("", json!({})).is_none());
    }

    #[test]
    fn payloads_are_typed_per_event() {
        let data = EventData::from_parts(
            "practice_complete",
            json!({ "challenge_id": "3", "practice_day": 2, "mood_change": "improved", "was_helpful": null }),
        )
        .unwrap();
        assert_eq!(
            data,
            EventData::PracticeComplete(PracticeFeedback {
                challenge_id: Some(3),
                practice_day: Some(2),
                mood_change: Some(MoodChange::Improved),
                was_helpful: None,
            })
        );
        assert_eq!(data.challenge_id(), Some(3));
    }

    #[test]
    fn malformed_payload_keeps_the_type() {
        let data = EventData::from_parts("ai_chat_message", json!("oops")).unwrap();
        assert_eq!(data, EventData::AiChatMessage(ChatMessage::default()));
        let data = EventData::from_parts("ai_chat_start", Value::Null).unwrap();
        assert_eq!(data.event_type(), EventType::AiChatStart);
    }

    #[test]
    fn stored_events_round_trip_through_json() {
        let event = Event::new(
            &context("u1"),
            EventData::PageVisit(PageVisit {
                page: Some("app_load".into()),
            }),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "page_visit");
        assert_eq!(value["event_data"]["page"], "app_load");
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn masks_addresses() {
        assert_eq!(mask_ip("203.0.113.77").as_deref(), Some("203.0.113.0"));
        assert_eq!(
            mask_ip("198.51.100.4, 10.0.0.1").as_deref(),
            Some("198.51.100.0")
        );
        assert_eq!(
            mask_ip("2001:db8:85a3::8a2e:370:7334").as_deref(),
            Some("2001:db8:85a3::")
        );
        assert_eq!(mask_ip("unknown"), None);
    }

    #[test]
    fn reconstructs_start_from_selection_then_activity() {
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        let ctx = context("u1");
        let view = |offset: i64| {
            Event::new(
                &ctx,
                EventData::PracticeView(PracticeView {
                    challenge_id: Some(4),
                    ..Default::default()
                }),
                base + Duration::days(offset),
            )
        };
        let mut events = vec![view(3), view(1), view(5)];
        assert_eq!(
            reconstruct_started_at(&events, "u1", 4),
            Some((base + Duration::days(1)).to_rfc3339())
        );

        events.push(Event::new(
            &ctx,
            EventData::ChallengeSelect(ChallengeSelect {
                challenge_id: Some(4),
                started_at: Some("2026-02-04T08:00:00Z".into()),
            }),
            base + Duration::days(3),
        ));
        assert_eq!(
            reconstruct_started_at(&events, "u1", 4).as_deref(),
            Some("2026-02-04T08:00:00Z")
        );
        assert_eq!(reconstruct_started_at(&events, "u2", 4), None);
        assert_eq!(reconstruct_started_at(&events, "u1", 5), None);
    }
}
