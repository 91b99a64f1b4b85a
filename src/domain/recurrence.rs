use crate::domain::models::{Attribution, Frequency, PlannedActivity, RecurringRule};
use crate::domain::time::{at_time_of_day, minutes};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanHandle {
    Persisted { id: String },
    Ghost { rule_id: String, date: NaiveDate },
}

impl PlanHandle {
    pub fn persisted(id: impl Into<String>) -> Self {
        Self::Persisted { id: id.into() }
    }

    pub fn ghost(rule_id: impl Into<String>, date: NaiveDate) -> Self {
        Self::Ghost {
            rule_id: rule_id.into(),
            date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GhostInstance {
    pub rule_id: String,
    pub date: NaiveDate,
    pub starts_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub attribution: Attribution,
}

impl GhostInstance {
    pub fn handle(&self) -> PlanHandle {
        PlanHandle::ghost(self.rule_id.clone(), self.date)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at + minutes(self.duration_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DayPlan {
    Persisted(PlannedActivity),
    Ghost(GhostInstance),
}

impl DayPlan {
    pub fn handle(&self) -> PlanHandle {
        match self {
            Self::Persisted(plan) => PlanHandle::persisted(plan.id.clone()),
            Self::Ghost(ghost) => ghost.handle(),
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        match self {
            Self::Persisted(plan) => plan.starts_at,
            Self::Ghost(ghost) => ghost.starts_at,
        }
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        match self {
            Self::Persisted(plan) => plan.ends_at(),
            Self::Ghost(ghost) => ghost.ends_at(),
        }
    }

    pub fn attribution(&self) -> &Attribution {
        match self {
            Self::Persisted(plan) => &plan.attribution,
            Self::Ghost(ghost) => &ghost.attribution,
        }
    }

    pub fn is_logged(&self) -> bool {
        match self {
            Self::Persisted(plan) => plan.is_logged,
            Self::Ghost(_) => false,
        }
    }
}

pub fn fires_on(frequency: &Frequency, date: NaiveDate) -> bool {
    match frequency {
        Frequency::Daily => date.weekday().num_days_from_monday() < 5,
        Frequency::Weekly { week_days } => week_days.contains(&date.weekday()),
        Frequency::Fortnightly { start_date } => {
            date >= *start_date && (date - *start_date).num_days() % 14 == 0
        }
        Frequency::Monthly { month_day } => date.day() == *month_day,
        Frequency::MonthlyNth { nth_week, week_day } => {
            is_nth_weekday_of_month(date, *nth_week, *week_day)
        }
    }
}

// nth_week == 5 means the last such weekday of the month.
fn is_nth_weekday_of_month(date: NaiveDate, nth_week: u8, week_day: Weekday) -> bool {
    if date.weekday() != week_day {
        return false;
    }
    if nth_week >= 5 {
        let next_same_weekday = date + Duration::days(7);
        return next_same_weekday.month() != date.month();
    }
    let occurrence = (date.day() - 1) / 7 + 1;
    occurrence == u32::from(nth_week)
}

pub fn evaluate(
    rule: &RecurringRule,
    date: NaiveDate,
    persisted: &[PlannedActivity],
) -> Option<GhostInstance> {
    if !fires_on(&rule.frequency, date) {
        return None;
    }
    if persisted.iter().any(|plan| plan.overrides(&rule.id, date)) {
        return None;
    }
    let starts_at = at_time_of_day(date, &rule.start_time)?;
    Some(GhostInstance {
        rule_id: rule.id.clone(),
        date,
        starts_at,
        duration_minutes: rule.duration_minutes,
        attribution: rule.attribution.clone(),
    })
}
