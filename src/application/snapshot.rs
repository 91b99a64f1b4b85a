use crate::domain::models::{
    ActiveTimer, Client, PlannedActivity, Project, RecurringRule, Task, TimerSession,
};
use crate::infrastructure::error::TrackerError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SNAPSHOT_VERSION: u32 = 1;

const COLLECTION_KEYS: [&str; 6] = [
    "tasks",
    "clients",
    "projects",
    "sessions",
    "plans",
    "recurring_rules",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub exported_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub sessions: Vec<TimerSession>,
    #[serde(default)]
    pub plans: Vec<PlannedActivity>,
    #[serde(default)]
    pub recurring_rules: Vec<RecurringRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_timer: Option<ActiveTimer>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportStrategy {
    Merge,
    Overwrite,
}

pub fn to_json(snapshot: &Snapshot) -> Result<String, TrackerError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn parse(raw: &str) -> Result<Snapshot, TrackerError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|error| TrackerError::MalformedImport(format!("not valid JSON: {error}")))?;
    let Some(object) = value.as_object() else {
        return Err(TrackerError::MalformedImport(
            "snapshot must be a JSON object".to_string(),
        ));
    };
    if !COLLECTION_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Err(TrackerError::MalformedImport(
            "snapshot contains no recognizable collection".to_string(),
        ));
    }

    let snapshot: Snapshot = serde_json::from_value(value)
        .map_err(|error| TrackerError::MalformedImport(error.to_string()))?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(TrackerError::MalformedImport(format!(
            "unsupported snapshot version: {}",
            snapshot.version
        )));
    }
    Ok(snapshot)
}
