use chrono::{Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub total_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub ticket: Option<String>,
    #[serde(default)]
    pub total_seconds: u64,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    pub created_at: NaiveDateTime,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        for subtask in &self.subtasks {
            validate_non_empty(&subtask.id, "task.subtasks[].id")?;
            validate_non_empty(&subtask.title, "task.subtasks[].title")?;
        }
        Ok(())
    }

    pub fn rolled_up_seconds(&self) -> u64 {
        self.subtasks
            .iter()
            .fold(self.total_seconds, |sum, subtask| {
                sum.saturating_add(subtask.total_seconds)
            })
    }

    pub fn subtask(&self, subtask_id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|subtask| subtask.id == subtask_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Milestone {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attribution {
    Task {
        task_id: String,
        #[serde(default)]
        subtask_id: Option<String>,
    },
    Quick {
        title: String,
        #[serde(default)]
        client_id: Option<String>,
    },
    Project {
        project_id: String,
        #[serde(default)]
        milestone_id: Option<String>,
        title: String,
    },
}

impl Attribution {
    pub fn unallocated() -> Self {
        Self::Quick {
            title: String::new(),
            client_id: None,
        }
    }

    pub fn entity(&self) -> Option<EntityRef> {
        match self {
            Self::Task {
                task_id,
                subtask_id: Some(subtask_id),
            } => Some(EntityRef::Subtask {
                task_id: task_id.clone(),
                subtask_id: subtask_id.clone(),
            }),
            Self::Task {
                task_id,
                subtask_id: None,
            } => Some(EntityRef::Task(task_id.clone())),
            Self::Quick { .. } | Self::Project { .. } => None,
        }
    }

    pub fn kind(&self) -> PlanKind {
        match self {
            Self::Task { .. } => PlanKind::Task,
            Self::Quick { .. } => PlanKind::Quick,
            Self::Project { .. } => PlanKind::Project,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Task { task_id, subtask_id } => {
                validate_non_empty(task_id, "attribution.task_id")?;
                if let Some(subtask_id) = subtask_id {
                    validate_non_empty(subtask_id, "attribution.subtask_id")?;
                }
                Ok(())
            }
            Self::Quick { .. } => Ok(()),
            Self::Project { project_id, .. } => {
                validate_non_empty(project_id, "attribution.project_id")
            }
        }
    }
}

impl From<TaskRef> for Attribution {
    fn from(target: TaskRef) -> Self {
        Self::Task {
            task_id: target.task_id,
            subtask_id: target.subtask_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Task(String),
    Subtask { task_id: String, subtask_id: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Task,
    Quick,
    Project,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub task_id: String,
    #[serde(default)]
    pub subtask_id: Option<String>,
}

impl TaskRef {
    pub fn task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            subtask_id: None,
        }
    }

    pub fn subtask(task_id: impl Into<String>, subtask_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            subtask_id: Some(subtask_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveTimer {
    pub target: Option<TaskRef>,
    pub started_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerSession {
    pub id: String,
    pub started_at: NaiveDateTime,
    #[serde(default)]
    pub ended_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub is_manual: bool,
    pub attribution: Attribution,
}

impl TimerSession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        self.attribution.validate()?;
        if let Some(ended_at) = self.ended_at {
            if ended_at < self.started_at {
                return Err("session.ended_at must be >= session.started_at".to_string());
            }
        }
        Ok(())
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.ended_at
            .map(|ended_at| (ended_at - self.started_at).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedActivity {
    pub id: String,
    pub date: NaiveDate,
    pub starts_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub attribution: Attribution,
    #[serde(default)]
    pub is_logged: bool,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub occurrence_date: Option<NaiveDate>,
}

impl PlannedActivity {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "plan.id")?;
        self.attribution.validate()?;
        if self.duration_minutes == 0 {
            return Err("plan.duration_minutes must be > 0".to_string());
        }
        if self.starts_at.date() != self.date {
            return Err("plan.starts_at must fall on plan.date".to_string());
        }
        Ok(())
    }

    pub fn kind(&self) -> PlanKind {
        self.attribution.kind()
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    // A promoted occurrence keeps replacing its rule's ghost on the original day after a move.
    pub fn overrides(&self, rule_id: &str, date: NaiveDate) -> bool {
        self.rule_id.as_deref() == Some(rule_id) && self.occurrence_date.unwrap_or(self.date) == date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "frequency", rename_all = "kebab-case")]
pub enum Frequency {
    Daily,
    Weekly {
        week_days: Vec<Weekday>,
    },
    Fortnightly {
        start_date: NaiveDate,
    },
    Monthly {
        month_day: u32,
    },
    // 1..=4, or 5 for the last occurrence in the month.
    MonthlyNth {
        nth_week: u8,
        week_day: Weekday,
    },
}

impl Frequency {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Daily | Self::Fortnightly { .. } => Ok(()),
            Self::Weekly { week_days } => {
                if week_days.is_empty() {
                    return Err("rule.week_days must not be empty".to_string());
                }
                Ok(())
            }
            Self::Monthly { month_day } => {
                if !(1..=31).contains(month_day) {
                    return Err("rule.month_day must be within 1..=31".to_string());
                }
                Ok(())
            }
            Self::MonthlyNth { nth_week, .. } => {
                if !(1..=5).contains(nth_week) {
                    return Err("rule.nth_week must be within 1..=5".to_string());
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurringRule {
    pub id: String,
    pub attribution: Attribution,
    pub start_time: String,
    pub duration_minutes: u32,
    #[serde(flatten)]
    pub frequency: Frequency,
}

impl RecurringRule {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "rule.id")?;
        self.attribution.validate()?;
        validate_hhmm(&self.start_time, "rule.start_time")?;
        if self.duration_minutes == 0 {
            return Err("rule.duration_minutes must be > 0".to_string());
        }
        self.frequency.validate()
    }
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let mut split = value.split(':');
    let Some(hour_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    let Some(minute_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if split.next().is_some() {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").expect("valid datetime")
    }

    fn sample_task() -> Task {
        Task {
            id: "tsk-1".to_string(),
            title: "Invoice export".to_string(),
            client_id: Some("cli-1".to_string()),
            ticket: Some("ACME-12".to_string()),
            total_seconds: 600,
            subtasks: vec![
                Subtask {
                    id: "sub-1".to_string(),
                    title: "Parser".to_string(),
                    total_seconds: 360,
                },
                Subtask {
                    id: "sub-2".to_string(),
                    title: "Tests".to_string(),
                    total_seconds: 720,
                },
            ],
            created_at: fixed_time("2026-02-16T08:00:00"),
        }
    }

    fn sample_session() -> TimerSession {
        TimerSession {
            id: "ses-1".to_string(),
            started_at: fixed_time("2026-02-16T09:00:00"),
            ended_at: Some(fixed_time("2026-02-16T09:12:00")),
            notes: "wire format".to_string(),
            is_manual: false,
            attribution: Attribution::Task {
                task_id: "tsk-1".to_string(),
                subtask_id: None,
            },
        }
    }

    fn sample_rule() -> RecurringRule {
        RecurringRule {
            id: "rul-1".to_string(),
            attribution: Attribution::Quick {
                title: "Standup".to_string(),
                client_id: None,
            },
            start_time: "09:30".to_string(),
            duration_minutes: 15,
            frequency: Frequency::Weekly {
                week_days: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
            },
        }
    }

    #[test]
    fn task_rolls_up_subtask_totals() {
        assert_eq!(sample_task().rolled_up_seconds(), 1_680);
    }

    #[test]
    fn task_validate_rejects_empty_title() {
        let mut task = sample_task();
        task.title = "   ".to_string();
        assert!(task.validate().is_err());
    }

    #[test]
    fn attribution_entity_prefers_subtask() {
        let subtask = Attribution::from(TaskRef::subtask("tsk-1", "sub-1"));
        assert_eq!(
            subtask.entity(),
            Some(EntityRef::Subtask {
                task_id: "tsk-1".to_string(),
                subtask_id: "sub-1".to_string(),
            })
        );
        assert_eq!(
            Attribution::from(TaskRef::task("tsk-1")).entity(),
            Some(EntityRef::Task("tsk-1".to_string()))
        );
        assert_eq!(Attribution::unallocated().entity(), None);
    }

    #[test]
    fn session_validate_rejects_reverse_time() {
        let mut session = sample_session();
        session.ended_at = Some(fixed_time("2026-02-16T08:59:00"));
        assert!(session.validate().is_err());
        assert_eq!(sample_session().elapsed_seconds(), 720);
    }

    #[test]
    fn rule_validate_checks_frequency_parameters() {
        assert!(sample_rule().validate().is_ok());

        let mut rule = sample_rule();
        rule.frequency = Frequency::Weekly { week_days: vec![] };
        assert!(rule.validate().is_err());

        rule.frequency = Frequency::MonthlyNth {
            nth_week: 6,
            week_day: Weekday::Tue,
        };
        assert!(rule.validate().is_err());

        rule.frequency = Frequency::Daily;
        rule.start_time = "25:00".to_string();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn rule_serializes_frequency_inline() {
        let value = serde_json::to_value(sample_rule()).expect("serialize rule");
        assert_eq!(value["frequency"], "weekly");
        assert_eq!(value["week_days"], serde_json::json!(["Mon", "Wed", "Fri"]));

        let parsed: RecurringRule = serde_json::from_value(value).expect("deserialize rule");
        assert_eq!(parsed, sample_rule());
    }

    #[test]
    fn plan_must_start_on_its_date() {
        let plan = PlannedActivity {
            id: "pln-1".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
            starts_at: fixed_time("2026-02-17T09:00:00"),
            duration_minutes: 30,
            attribution: Attribution::unallocated(),
            is_logged: false,
            rule_id: None,
            occurrence_date: None,
        };
        assert!(plan.validate().is_err());
    }
}
