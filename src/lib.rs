pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::ledger::SessionPatch;
pub use application::notifications::Notification;
pub use application::plans::{PlanPatch, ToggleOutcome};
pub use application::reminders::spawn_reminder_loop;
pub use application::snapshot::ImportStrategy;
pub use application::timer::{FinalizeOutcome, StartOutcome, TimerReadout};
pub use application::tracker::{NowProvider, TaskPatch, Tracker};
pub use domain::models::{
    ActiveTimer, Attribution, Client, Frequency, Milestone, PlannedActivity, Project,
    RecurringRule, Subtask, Task, TaskRef, TimerSession,
};
pub use domain::recurrence::{DayPlan, PlanHandle};
pub use infrastructure::config::TrackerSettings;
pub use infrastructure::error::TrackerError;
