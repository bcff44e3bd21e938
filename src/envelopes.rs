//! Letters to a future self.
//!
//! The envelope service is an external collaborator: it receives an already
//! encrypted message and an unlock time, and hands back an id. Locally we
//! only remember the metadata needed to find an envelope again, never the
//! message itself.

use crate::selection::{KeyValueStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENVELOPES_KEY: &str = "dandani_envelopes";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvelopeRequest {
    /// Epoch milliseconds.
    pub unlock_at: i64,
    pub password_protected: bool,
    pub encrypted_message: String,
    pub user_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEnvelope {
    pub id: String,
}

pub struct EnvelopeClient {
    base_url: String,
    http: reqwest::Client,
}

impl EnvelopeClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub async fn create(&self, request: &CreateEnvelopeRequest) -> Result<CreatedEnvelope, reqwest::Error> {
        self.http
            .post(format!("{}/envelopes", self.base_url))
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Raw envelope as the service returns it.
    pub async fn fetch(&self, id: &str) -> Result<serde_json::Value, reqwest::Error> {
        self.http
            .get(format!("{}/envelopes/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub id: String,
    pub challenge_id: String,
    #[serde(default)]
    pub challenge_name: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub unlock_at: DateTime<Utc>,
    pub share_url: String,
    pub status: EnvelopeStatus,
}

impl EnvelopeMeta {
    pub fn status_at(&self, now: DateTime<Utc>) -> EnvelopeStatus {
        if now >= self.unlock_at {
            EnvelopeStatus::Unlocked
        } else {
            EnvelopeStatus::Locked
        }
    }
}

/// Envelope metadata kept in the client-local store.
pub struct EnvelopeCache<'a, S> {
    store: &'a S,
}

impl<'a, S: KeyValueStore> EnvelopeCache<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn list(&self) -> Vec<EnvelopeMeta> {
        let Some(raw) = self.store.get(ENVELOPES_KEY) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(error = %err, "stored envelopes are unreadable");
            Vec::new()
        })
    }

    pub fn save(&self, mut envelope: EnvelopeMeta) -> Result<EnvelopeMeta, StoreError> {
        envelope.status = EnvelopeStatus::Locked;
        let mut envelopes = self.list();
        envelopes.retain(|existing| existing.id != envelope.id);
        envelopes.push(envelope.clone());
        self.write(&envelopes)?;
        Ok(envelope)
    }

    pub fn get(&self, id: &str) -> Option<EnvelopeMeta> {
        self.list().into_iter().find(|envelope| envelope.id == id)
    }

    pub fn for_challenge(&self, challenge_id: &str) -> Vec<EnvelopeMeta> {
        self.list()
            .into_iter()
            .filter(|envelope| envelope.challenge_id == challenge_id)
            .collect()
    }

    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut envelopes = self.list();
        let before = envelopes.len();
        envelopes.retain(|envelope| envelope.id != id);
        if envelopes.len() == before {
            return Ok(false);
        }
        self.write(&envelopes)?;
        Ok(true)
    }

    /// Recomputes lock status for every envelope, writing only on change.
    pub fn refresh_statuses(&self, now: DateTime<Utc>) -> Result<Vec<EnvelopeMeta>, StoreError> {
        let mut envelopes = self.list();
        let mut changed = false;
        for envelope in &mut envelopes {
            let status = envelope.status_at(now);
            if envelope.status != status {
                envelope.status = status;
                changed = true;
            }
        }
        if changed {
            self.write(&envelopes)?;
        }
        Ok(envelopes)
    }

    fn write(&self, envelopes: &[EnvelopeMeta]) -> Result<(), StoreError> {
        self.store.set(ENVELOPES_KEY, &serde_json::to_string(envelopes)?)
    }
}
