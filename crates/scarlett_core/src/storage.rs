//! Persisted state blob and backup export/import.
//!
//! The state lives in a single JSON file wrapped as `{version, state}`. Old
//! blobs are migrated on the JSON value before typed deserialization, so
//! missing fields fall back to their defaults and reminder times written in
//! older formats come back as `HH:MM`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    error::{TrackerError, TrackerResult},
    reminders::FALLBACK_TIME,
    state::AppState,
    time::{normalize_time_of_day, TimeValue},
};

pub const STATE_FILE: &str = "scarlett-app-state.json";
pub const STATE_VERSION: u32 = 1;

/// Keys written by export and accepted by import.
pub const BACKUP_KEYS: [&str; 16] = [
    "days",
    "goal",
    "reminders",
    "chat",
    "saved",
    "achievementsUnlocked",
    "xp",
    "language",
    "theme",
    "eventHistory",
    "xpLog",
    "eventsEnabled",
    "cycles",
    "cycleLogs",
    "waterCupMl",
    "heightCm",
];

#[derive(Serialize, Deserialize)]
struct Blob {
    version: u32,
    state: Value,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored state, or a fresh one when nothing was saved yet.
    pub fn load(&self) -> Result<AppState> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no saved state, starting fresh");
            return Ok(AppState::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        state_from_value(value)
    }

    /// Write through a temp file and rename, so a crash never leaves a
    /// half-written blob behind.
    pub fn save(&self, state: &AppState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let blob = Blob {
            version: STATE_VERSION,
            state: serde_json::to_value(state)?,
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&blob)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Accepts both the `{version, state}` blob and a bare state object.
pub fn state_from_value(value: Value) -> Result<AppState> {
    let mut state = match value {
        Value::Object(mut map) if map.contains_key("version") && map.contains_key("state") => {
            let version = map.get("version").and_then(Value::as_u64).unwrap_or(0);
            if version > STATE_VERSION as u64 {
                warn!(version, "state written by a newer version");
            }
            map.remove("state").unwrap_or(Value::Null)
        }
        other => other,
    };
    anyhow::ensure!(state.is_object(), "stored state is not a JSON object");
    migrate(&mut state);
    serde_json::from_value(state).map_err(|err| anyhow!("decoding state: {err}"))
}

/// Repair older shapes in place before typed decoding.
pub fn migrate(state: &mut Value) {
    if let Some(days) = state.get_mut("days").and_then(Value::as_object_mut) {
        for (key, day) in days.iter_mut() {
            let Some(day) = day.as_object_mut() else {
                continue;
            };
            let dated = day
                .get("date")
                .and_then(Value::as_str)
                .is_some_and(|d| !d.is_empty());
            if !dated {
                day.insert("date".into(), Value::String(key.clone()));
            }
        }
    }
    if let Some(reminders) = state.get_mut("reminders").and_then(Value::as_array_mut) {
        for reminder in reminders.iter_mut().filter_map(Value::as_object_mut) {
            let normalized = reminder
                .get("time")
                .and_then(TimeValue::from_json)
                .and_then(normalize_time_of_day);
            let time = normalized.unwrap_or_else(|| {
                warn!(id = ?reminder.get("id"), "unreadable reminder time, using fallback");
                FALLBACK_TIME.to_string()
            });
            reminder.insert("time".into(), Value::String(time));
        }
    }
}

/// Flat JSON object of the backup keys.
pub fn export_backup(state: &AppState) -> Result<Value> {
    let Value::Object(mut full) = serde_json::to_value(state)? else {
        return Err(anyhow!("state did not serialize to an object"));
    };
    let mut out = Map::new();
    for key in BACKUP_KEYS {
        out.insert(key.to_string(), full.remove(key).unwrap_or(Value::Null));
    }
    Ok(Value::Object(out))
}

pub fn export_backup_string(state: &AppState) -> Result<String> {
    Ok(serde_json::to_string_pretty(&export_backup(state)?)?)
}

/// Merge a backup over `current`.
///
/// The text is fully parsed and decoded before anything is returned, so a bad
/// file can never leave a partially imported state. Keys outside
/// [`BACKUP_KEYS`] are ignored and the rest of `current` is kept.
pub fn import_backup(current: &AppState, raw: &str) -> TrackerResult<AppState> {
    let incoming: Value =
        serde_json::from_str(raw).map_err(|err| TrackerError::Import(err.to_string()))?;
    let Value::Object(mut incoming) = incoming else {
        return Err(TrackerError::Import("backup is not a JSON object".into()));
    };
    let Value::Object(mut merged) =
        serde_json::to_value(current).map_err(|err| TrackerError::Import(err.to_string()))?
    else {
        return Err(TrackerError::Import("state did not serialize to an object".into()));
    };
    let mut taken = 0;
    for key in BACKUP_KEYS {
        if let Some(value) = incoming.remove(key) {
            merged.insert(key.to_string(), value);
            taken += 1;
        }
    }
    let mut merged = Value::Object(merged);
    migrate(&mut merged);
    let state: AppState =
        serde_json::from_value(merged).map_err(|err| TrackerError::Import(err.to_string()))?;
    info!(keys = taken, ignored = incoming.len(), "backup merged");
    Ok(state)
}
