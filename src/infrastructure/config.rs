use crate::infrastructure::error::TrackerError;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const SETTINGS_JSON: &str = "settings.json";
const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub block_minutes: u32,
    pub minimum_fill_minutes: u32,
    pub gap_buffer_seconds: u32,
    pub day_start: String,
    pub day_end: String,
    pub reminder_lead_minutes: u32,
    pub reminder_scan_seconds: u32,
    pub plan_match_tolerance_millis: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            block_minutes: 6,
            minimum_fill_minutes: 5,
            gap_buffer_seconds: 1,
            day_start: "08:00".to_string(),
            day_end: "18:00".to_string(),
            reminder_lead_minutes: 10,
            reminder_scan_seconds: 30,
            plan_match_tolerance_millis: 999,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.block_minutes == 0 {
            return Err(TrackerError::InvalidConfig(
                "blockMinutes must be > 0".to_string(),
            ));
        }
        if self.reminder_scan_seconds == 0 {
            return Err(TrackerError::InvalidConfig(
                "reminderScanSeconds must be > 0".to_string(),
            ));
        }
        let start = parse_boundary(&self.day_start, "dayStart")?;
        let end = parse_boundary(&self.day_end, "dayEnd")?;
        if end <= start {
            return Err(TrackerError::InvalidConfig(
                "dayEnd must be after dayStart".to_string(),
            ));
        }
        Ok(())
    }

    pub fn block_seconds(&self) -> i64 {
        i64::from(self.block_minutes) * 60
    }

    pub fn day_bounds(&self) -> (NaiveTime, NaiveTime) {
        let fallback = TrackerSettings::default();
        let start = NaiveTime::parse_from_str(&self.day_start, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&fallback.day_start, "%H:%M"))
            .unwrap_or(NaiveTime::MIN);
        let end = NaiveTime::parse_from_str(&self.day_end, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&fallback.day_end, "%H:%M"))
            .unwrap_or(NaiveTime::MIN);
        (start, end)
    }
}

fn parse_boundary(value: &str, field_name: &str) -> Result<NaiveTime, TrackerError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| TrackerError::InvalidConfig(format!("{field_name} must be HH:MM")))
}

pub fn ensure_default_settings(config_dir: &Path) -> Result<(), TrackerError> {
    let path = config_dir.join(SETTINGS_JSON);
    if path.exists() {
        return Ok(());
    }
    let mut value = serde_json::to_value(TrackerSettings::default())?;
    if let Some(object) = value.as_object_mut() {
        object.insert("schema".to_string(), serde_json::json!(SCHEMA_VERSION));
    }
    let formatted = serde_json::to_string_pretty(&value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, TrackerError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            TrackerError::InvalidConfig(format!("missing schema in {}", path.display()))
        })?;
    if schema != SCHEMA_VERSION {
        return Err(TrackerError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_settings(config_dir: &Path) -> Result<TrackerSettings, TrackerError> {
    let parsed = read_config(&config_dir.join(SETTINGS_JSON))?;
    let settings: TrackerSettings = serde_json::from_value(parsed)?;
    settings.validate()?;
    Ok(settings)
}

pub fn load_settings_or_default(config_dir: &Path) -> TrackerSettings {
    match load_settings(config_dir) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(%error, "falling back to default settings");
            TrackerSettings::default()
        }
    }
}
