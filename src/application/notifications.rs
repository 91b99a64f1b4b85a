use crate::domain::models::TimerSession;
use crate::domain::recurrence::PlanHandle;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    PlanStartingSoon {
        handle: PlanHandle,
        title: String,
        starts_at: NaiveDateTime,
        minutes_until: i64,
    },
    SessionDeleted { session: TimerSession },
}
