//! Client-local durable state: the selected challenge run, the per-browser
//! user id and the onboarding flag.
//!
//! Everything goes through [`KeyValueStore`] so calculation code never
//! touches ambient storage and tests can use [`MemoryStore`].

use crate::dates::parse_database_date;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

pub const SELECTION_KEY: &str = "dandani_selected_challenge";
pub const LEGACY_SELECTION_KEY: &str = "dandani_selected_challenge_id";
pub const USER_ID_KEY: &str = "dandani_user_id";
pub const ONBOARDING_KEY: &str = "dandani_onboarding_completed";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store contents are not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock_entries(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock_entries(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock_entries(&self.entries).remove(key);
        Ok(())
    }
}

// A panic while holding the lock cannot leave a map half-written.
fn lock_entries(entries: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(entries)?)?;
        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StoreError> {
        let mut entries = lock_entries(&self.entries);
        change(&mut entries);
        self.flush(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock_entries(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(rename = "id")]
    pub challenge_id: String,
    #[serde(default)]
    pub started_at: Option<String>,
}

impl Selection {
    pub fn started_at_valid(&self) -> bool {
        self.started_at
            .as_deref()
            .and_then(parse_database_date)
            .is_some()
    }
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct SelectionStore<S> {
    store: S,
}

impl<S: KeyValueStore> SelectionStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The stored run, migrating the bare-id legacy key on first read.
    pub fn get_selection(&self) -> Option<Selection> {
        if let Some(selection) = self.store.get(SELECTION_KEY).and_then(|raw| parse_selection(&raw)) {
            return Some(selection);
        }

        let legacy = self.store.get(LEGACY_SELECTION_KEY)?;
        let selection = parse_selection(&legacy)?;
        if let Err(err) = self.write(&selection) {
            warn!(error = %err, "failed to migrate legacy challenge selection");
            return Some(selection);
        }
        if let Err(err) = self.store.remove(LEGACY_SELECTION_KEY) {
            warn!(error = %err, "failed to remove legacy challenge selection");
        }
        Some(selection)
    }

    /// Selects a challenge. Re-selecting the current challenge keeps its start.
    pub fn set_challenge_id(&self, challenge_id: &str, now: DateTime<Utc>) -> Result<Selection, StoreError> {
        if let Some(current) = self.get_selection() {
            if current.challenge_id == challenge_id && current.started_at_valid() {
                return Ok(current);
            }
        }

        let selection = Selection {
            challenge_id: challenge_id.to_string(),
            started_at: Some(timestamp(now)),
        };
        self.write(&selection)?;
        debug!(challenge_id, "challenge selected");
        Ok(selection)
    }

    pub fn clear_selection(&self) -> Result<(), StoreError> {
        self.store.remove(SELECTION_KEY)?;
        self.store.remove(LEGACY_SELECTION_KEY)
    }

    /// Returns the start of the stored run for `challenge_id`, repairing it
    /// first when the stored run is for another challenge or has no usable
    /// start. An existing valid start is never replaced.
    pub fn validate_and_fix_started_at(
        &self,
        challenge_id: &str,
        started_at_override: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        if let Some(current) = self.get_selection() {
            if current.challenge_id == challenge_id && current.started_at_valid() {
                if let Some(started_at) = current.started_at {
                    return Ok(started_at);
                }
            }
        }

        let started_at = started_at_override
            .filter(|raw| parse_database_date(raw).is_some())
            .map(str::to_string)
            .unwrap_or_else(|| timestamp(now));
        self.write(&Selection {
            challenge_id: challenge_id.to_string(),
            started_at: Some(started_at.clone()),
        })?;
        debug!(challenge_id, %started_at, "challenge start repaired");
        Ok(started_at)
    }

    fn write(&self, selection: &Selection) -> Result<(), StoreError> {
        self.store.set(SELECTION_KEY, &serde_json::to_string(selection)?)
    }
}

// Accepts the JSON form and the bare id the first client stored.
fn parse_selection(raw: &str) -> Option<Selection> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => {
            let challenge_id = match map.get("id")? {
                serde_json::Value::String(id) if !id.is_empty() => id.clone(),
                serde_json::Value::Number(id) => id.to_string(),
                _ => return None,
            };
            let started_at = map
                .get("startedAt")
                .and_then(|value| value.as_str())
                .map(str::to_string);
            Some(Selection {
                challenge_id,
                started_at,
            })
        }
        Ok(serde_json::Value::Number(id)) => Some(Selection {
            challenge_id: id.to_string(),
            started_at: None,
        }),
        Ok(serde_json::Value::String(id)) if !id.is_empty() => Some(Selection {
            challenge_id: id,
            started_at: None,
        }),
        Ok(_) => None,
        Err(_) => Some(Selection {
            challenge_id: raw.to_string(),
            started_at: None,
        }),
    }
}

/// The per-browser user id, created on first use.
pub fn user_id<S: KeyValueStore>(store: &S, now: DateTime<Utc>) -> String {
    if let Some(id) = store.get(USER_ID_KEY).filter(|id| !id.is_empty()) {
        return id;
    }

    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    let id = format!("user_{}_{}", now.timestamp_millis(), suffix);
    if let Err(err) = store.set(USER_ID_KEY, &id) {
        warn!(error = %err, "failed to persist user id");
    }
    id
}

pub fn onboarding_completed<S: KeyValueStore>(store: &S) -> bool {
    store.get(ONBOARDING_KEY).as_deref() == Some("true")
}

pub fn mark_onboarding_completed<S: KeyValueStore>(store: &S) -> Result<(), StoreError> {
    store.set(ONBOARDING_KEY, "true")
}
