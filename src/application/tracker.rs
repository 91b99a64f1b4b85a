use crate::application::bootstrap::bootstrap_workspace;
use crate::application::export::{day_rows, render_table, ExportRow};
use crate::application::ledger::{SessionLedger, SessionPatch, TaskBook};
use crate::application::notifications::Notification;
use crate::application::plans::{PlanPatch, PlanStore, ToggleOutcome};
use crate::application::reminders::ReminderTracker;
use crate::application::snapshot::{self, ImportStrategy, Snapshot, SNAPSHOT_VERSION};
use crate::application::timer::{FinalizeOutcome, StartOutcome, TimerMachine, TimerReadout};
use crate::domain::gaps::{BusyInterval, FillWindow, GapScheduler};
use crate::domain::models::{
    next_id, validate_hhmm, ActiveTimer, Attribution, Client, Frequency, Milestone,
    PlannedActivity, Project, RecurringRule, Subtask, Task, TaskRef, TimerSession,
};
use crate::domain::recurrence::{DayPlan, PlanHandle};
use crate::domain::time::{date_key, minutes};
use crate::infrastructure::config::{load_settings_or_default, TrackerSettings};
use crate::infrastructure::error::TrackerError;
use crate::infrastructure::kv_store::{load_json, save_json, KeyValueStore, SqliteKeyValueStore};
use crate::infrastructure::logging::init_logging;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

pub type NowProvider = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

const KEY_TASKS: &str = "tasks";
const KEY_CLIENTS: &str = "clients";
const KEY_PROJECTS: &str = "projects";
const KEY_SESSIONS: &str = "sessions";
const KEY_PLANS: &str = "plans";
const KEY_RULES: &str = "recurring_rules";
const KEY_ACTIVE_TIMER: &str = "active_timer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Tasks,
    Clients,
    Projects,
    Sessions,
    Plans,
    Rules,
    ActiveTimer,
}

const ALL_COLLECTIONS: [Collection; 7] = [
    Collection::Tasks,
    Collection::Clients,
    Collection::Projects,
    Collection::Sessions,
    Collection::Plans,
    Collection::Rules,
    Collection::ActiveTimer,
];

#[derive(Debug, Default)]
struct RuntimeState {
    tasks: TaskBook,
    clients: Vec<Client>,
    projects: Vec<Project>,
    ledger: SessionLedger,
    timer: TimerMachine,
    plans: PlanStore,
    reminders: ReminderTracker,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub client_id: Option<Option<String>>,
    pub ticket: Option<Option<String>>,
}

pub struct Tracker {
    workspace_root: Option<PathBuf>,
    store: Arc<dyn KeyValueStore>,
    settings: TrackerSettings,
    now_provider: NowProvider,
    runtime: Mutex<RuntimeState>,
    _log_guard: Option<WorkerGuard>,
}

impl Tracker {
    pub fn open(workspace_root: PathBuf) -> Result<Self, TrackerError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let log_guard = match init_logging(&bootstrap.logs_dir) {
            Ok(guard) => Some(guard),
            Err(error) => {
                warn!(%error, "file logging unavailable");
                None
            }
        };
        let settings = load_settings_or_default(&bootstrap.config_dir);
        let store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));

        let mut tracker = Self::with_store(store, settings);
        tracker.workspace_root = Some(bootstrap.workspace_root);
        tracker._log_guard = log_guard;
        Ok(tracker)
    }

    pub fn with_store(store: Arc<dyn KeyValueStore>, settings: TrackerSettings) -> Self {
        let tasks: Vec<Task> = load_json(store.as_ref(), KEY_TASKS).unwrap_or_default();
        let clients: Vec<Client> = load_json(store.as_ref(), KEY_CLIENTS).unwrap_or_default();
        let projects: Vec<Project> = load_json(store.as_ref(), KEY_PROJECTS).unwrap_or_default();
        let sessions: Vec<TimerSession> =
            load_json(store.as_ref(), KEY_SESSIONS).unwrap_or_default();
        let plans: Vec<PlannedActivity> = load_json(store.as_ref(), KEY_PLANS).unwrap_or_default();
        let rules: Vec<RecurringRule> = load_json(store.as_ref(), KEY_RULES).unwrap_or_default();
        let active_timer: Option<ActiveTimer> = load_json(store.as_ref(), KEY_ACTIVE_TIMER);

        info!(
            tasks = tasks.len(),
            sessions = sessions.len(),
            plans = plans.len(),
            rules = rules.len(),
            timer_running = active_timer.is_some(),
            "tracker state loaded"
        );

        let runtime = RuntimeState {
            tasks: TaskBook::new(tasks),
            clients,
            projects,
            ledger: SessionLedger::new(sessions),
            timer: TimerMachine::new(active_timer),
            plans: PlanStore::new(plans, rules),
            reminders: ReminderTracker::default(),
        };

        Self {
            workspace_root: None,
            store,
            settings,
            now_provider: Arc::new(|| Local::now().naive_local()),
            runtime: Mutex::new(runtime),
            _log_guard: None,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.now_provider)()
    }

    fn lock_runtime(&self) -> Result<MutexGuard<'_, RuntimeState>, TrackerError> {
        self.runtime
            .lock()
            .map_err(|error| TrackerError::Persistence(format!("runtime lock poisoned: {error}")))
    }

    // Failures are logged; memory stays authoritative.
    fn persist(&self, runtime: &RuntimeState, collections: &[Collection]) {
        for collection in collections {
            let result = match collection {
                Collection::Tasks => save_json(self.store.as_ref(), KEY_TASKS, runtime.tasks.tasks()),
                Collection::Clients => save_json(self.store.as_ref(), KEY_CLIENTS, &runtime.clients),
                Collection::Projects => {
                    save_json(self.store.as_ref(), KEY_PROJECTS, &runtime.projects)
                }
                Collection::Sessions => {
                    save_json(self.store.as_ref(), KEY_SESSIONS, runtime.ledger.sessions())
                }
                Collection::Plans => save_json(self.store.as_ref(), KEY_PLANS, runtime.plans.plans()),
                Collection::Rules => save_json(self.store.as_ref(), KEY_RULES, runtime.plans.rules()),
                Collection::ActiveTimer => match runtime.timer.active() {
                    Some(timer) => save_json(self.store.as_ref(), KEY_ACTIVE_TIMER, timer),
                    None => self.store.remove(KEY_ACTIVE_TIMER),
                },
            };
            if let Err(error) = result {
                error!(?collection, %error, "failed to persist collection");
            }
        }
    }

    // Tasks, clients and projects.

    pub fn create_task(
        &self,
        title: String,
        client_id: Option<String>,
        ticket: Option<String>,
    ) -> Result<Task, TrackerError> {
        let task = Task {
            id: next_id("tsk"),
            title: title.trim().to_string(),
            client_id: non_empty(client_id),
            ticket: non_empty(ticket),
            total_seconds: 0,
            subtasks: Vec::new(),
            created_at: self.now(),
        };
        task.validate().map_err(TrackerError::InvalidInput)?;

        let mut runtime = self.lock_runtime()?;
        runtime.tasks.upsert(task.clone());
        self.persist(&runtime, &[Collection::Tasks]);
        info!(command = "create_task", task_id = %task.id, "created task");
        Ok(task)
    }

    pub fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let mut task = runtime
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| TrackerError::not_found("task", task_id))?;
        if let Some(title) = patch.title {
            task.title = title.trim().to_string();
        }
        if let Some(client_id) = patch.client_id {
            task.client_id = non_empty(client_id);
        }
        if let Some(ticket) = patch.ticket {
            task.ticket = non_empty(ticket);
        }
        task.validate().map_err(TrackerError::InvalidInput)?;

        runtime.tasks.upsert(task);
        let updated = runtime
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| TrackerError::not_found("task", task_id))?;
        self.persist(&runtime, &[Collection::Tasks]);
        info!(command = "update_task", task_id, "updated task");
        Ok(updated)
    }

    pub fn delete_task(&self, task_id: &str) -> Result<bool, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        if runtime.tasks.remove(task_id).is_none() {
            return Ok(false);
        }
        self.persist(&runtime, &[Collection::Tasks]);
        info!(command = "delete_task", task_id, "deleted task");
        Ok(true)
    }

    pub fn add_subtask(&self, task_id: &str, title: String) -> Result<Subtask, TrackerError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(TrackerError::InvalidInput(
                "subtask title must not be empty".to_string(),
            ));
        }
        let subtask = Subtask {
            id: next_id("sub"),
            title,
            total_seconds: 0,
        };

        let mut runtime = self.lock_runtime()?;
        runtime.tasks.add_subtask(task_id, subtask.clone())?;
        self.persist(&runtime, &[Collection::Tasks]);
        info!(command = "add_subtask", task_id, subtask_id = %subtask.id, "added subtask");
        Ok(subtask)
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>, TrackerError> {
        let runtime = self.lock_runtime()?;
        let mut tasks = runtime.tasks.tasks().to_vec();
        tasks.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(tasks)
    }

    pub fn task_total_seconds(&self, task_id: &str) -> Result<u64, TrackerError> {
        let runtime = self.lock_runtime()?;
        runtime
            .tasks
            .get(task_id)
            .map(Task::rolled_up_seconds)
            .ok_or_else(|| TrackerError::not_found("task", task_id))
    }

    pub fn create_client(&self, name: String) -> Result<Client, TrackerError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(TrackerError::InvalidInput(
                "client name must not be empty".to_string(),
            ));
        }
        let client = Client {
            id: next_id("cli"),
            name,
        };

        let mut runtime = self.lock_runtime()?;
        runtime.clients.push(client.clone());
        self.persist(&runtime, &[Collection::Clients]);
        info!(command = "create_client", client_id = %client.id, "created client");
        Ok(client)
    }

    pub fn list_clients(&self) -> Result<Vec<Client>, TrackerError> {
        Ok(self.lock_runtime()?.clients.clone())
    }

    pub fn delete_client(&self, client_id: &str) -> Result<bool, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let before = runtime.clients.len();
        runtime.clients.retain(|client| client.id != client_id);
        if runtime.clients.len() == before {
            return Ok(false);
        }
        self.persist(&runtime, &[Collection::Clients]);
        info!(command = "delete_client", client_id, "deleted client");
        Ok(true)
    }

    pub fn create_project(
        &self,
        name: String,
        client_id: Option<String>,
    ) -> Result<Project, TrackerError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(TrackerError::InvalidInput(
                "project name must not be empty".to_string(),
            ));
        }
        let project = Project {
            id: next_id("prj"),
            name,
            client_id: non_empty(client_id),
            milestones: Vec::new(),
        };

        let mut runtime = self.lock_runtime()?;
        runtime.projects.push(project.clone());
        self.persist(&runtime, &[Collection::Projects]);
        info!(command = "create_project", project_id = %project.id, "created project");
        Ok(project)
    }

    pub fn add_milestone(&self, project_id: &str, title: String) -> Result<Milestone, TrackerError> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(TrackerError::InvalidInput(
                "milestone title must not be empty".to_string(),
            ));
        }
        let milestone = Milestone {
            id: next_id("mst"),
            title,
        };

        let mut runtime = self.lock_runtime()?;
        let project = runtime
            .projects
            .iter_mut()
            .find(|project| project.id == project_id)
            .ok_or_else(|| TrackerError::not_found("project", project_id))?;
        project.milestones.push(milestone.clone());
        self.persist(&runtime, &[Collection::Projects]);
        info!(command = "add_milestone", project_id, milestone_id = %milestone.id, "added milestone");
        Ok(milestone)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        Ok(self.lock_runtime()?.projects.clone())
    }

    // Timer.

    pub fn start_timer(
        &self,
        target: Option<TaskRef>,
        override_start: Option<NaiveDateTime>,
    ) -> Result<StartOutcome, TrackerError> {
        let now = self.now();
        let mut runtime = self.lock_runtime()?;
        if let Some(target) = &target {
            ensure_task_ref(&runtime, target)?;
        }
        let latest_end = runtime.ledger.latest_end_on(date_key(now));
        let outcome = runtime.timer.start(target, override_start, now, latest_end);

        match &outcome {
            StartOutcome::Started { timer } => {
                self.persist(&runtime, &[Collection::ActiveTimer]);
                info!(command = "start_timer", started_at = %timer.started_at, target = ?timer.target, "timer started");
            }
            StartOutcome::AlreadyRunning { .. } => {
                debug!(command = "start_timer", "timer already running for target");
            }
            StartOutcome::AwaitingFinalize { queued, .. } => {
                info!(command = "start_timer", queued = ?queued, "target queued until running timer is finalized");
            }
        }
        Ok(outcome)
    }

    pub fn cancel_timer(&self) -> Result<Option<ActiveTimer>, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let cancelled = runtime.timer.cancel();
        if cancelled.is_some() {
            self.persist(&runtime, &[Collection::ActiveTimer]);
            info!(command = "cancel_timer", "timer cancelled");
        }
        Ok(cancelled)
    }

    pub fn finalize_timer(
        &self,
        notes: String,
        attribution_override: Option<Attribution>,
    ) -> Result<FinalizeOutcome, TrackerError> {
        let now = self.now();
        let mut runtime = self.lock_runtime()?;
        if let Some(attribution) = &attribution_override {
            ensure_attribution(&runtime, attribution)?;
        }
        let outcome = runtime.timer.finalize(
            notes,
            now,
            attribution_override,
            self.settings.block_seconds(),
        )?;

        let state = &mut *runtime;
        let session = state.ledger.add(outcome.session.clone(), &mut state.tasks)?;
        self.persist(
            &runtime,
            &[Collection::Sessions, Collection::Tasks, Collection::ActiveTimer],
        );
        info!(
            command = "finalize_timer",
            session_id = %session.id,
            seconds = session.elapsed_seconds(),
            chained = outcome.chained.is_some(),
            "timer finalized"
        );
        Ok(outcome)
    }

    pub fn switch_timer(
        &self,
        target: Option<TaskRef>,
        notes: String,
    ) -> Result<Option<FinalizeOutcome>, TrackerError> {
        match self.start_timer(target, None)? {
            StartOutcome::AwaitingFinalize { .. } => self.finalize_timer(notes, None).map(Some),
            StartOutcome::Started { .. } | StartOutcome::AlreadyRunning { .. } => Ok(None),
        }
    }

    pub fn active_timer(&self) -> Result<Option<ActiveTimer>, TrackerError> {
        Ok(self.lock_runtime()?.timer.active().cloned())
    }

    pub fn timer_readout(&self) -> Result<Option<TimerReadout>, TrackerError> {
        let now = self.now();
        Ok(self.lock_runtime()?.timer.readout(now))
    }

    // Sessions.

    pub fn log_manual_session(
        &self,
        started_at: NaiveDateTime,
        ended_at: NaiveDateTime,
        notes: String,
        attribution: Attribution,
    ) -> Result<TimerSession, TrackerError> {
        if ended_at < started_at {
            return Err(TrackerError::InvalidRange);
        }
        let mut runtime = self.lock_runtime()?;
        ensure_attribution(&runtime, &attribution)?;
        let state = &mut *runtime;
        let session = state.ledger.add(
            TimerSession {
                id: next_id("ses"),
                started_at,
                ended_at: Some(ended_at),
                notes,
                is_manual: true,
                attribution,
            },
            &mut state.tasks,
        )?;
        self.persist(&runtime, &[Collection::Sessions, Collection::Tasks]);
        info!(command = "log_manual_session", session_id = %session.id, "manual session logged");
        Ok(session)
    }

    pub fn update_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<TimerSession, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        if let Some(attribution) = &patch.attribution {
            ensure_attribution(&runtime, attribution)?;
        }
        let state = &mut *runtime;
        let updated = state.ledger.update(session_id, patch, &mut state.tasks)?;
        self.persist(&runtime, &[Collection::Sessions, Collection::Tasks]);
        info!(command = "update_session", session_id, "session updated");
        Ok(updated)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<Notification, TrackerError> {
        let tolerance = Duration::milliseconds(i64::from(self.settings.plan_match_tolerance_millis));
        let mut runtime = self.lock_runtime()?;
        let state = &mut *runtime;
        let removed = state
            .ledger
            .delete(session_id, &mut state.tasks, &mut state.plans, tolerance)?;
        self.persist(
            &runtime,
            &[Collection::Sessions, Collection::Tasks, Collection::Plans],
        );
        info!(command = "delete_session", session_id, "session deleted");
        Ok(Notification::SessionDeleted { session: removed })
    }

    pub fn restore_session(&self, session: TimerSession) -> Result<TimerSession, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let state = &mut *runtime;
        let restored = state.ledger.add(session, &mut state.tasks)?;
        self.persist(&runtime, &[Collection::Sessions, Collection::Tasks]);
        info!(command = "restore_session", session_id = %restored.id, "session restored");
        Ok(restored)
    }

    pub fn sessions_on(&self, date: NaiveDate) -> Result<Vec<TimerSession>, TrackerError> {
        Ok(self.lock_runtime()?.ledger.sessions_on(date))
    }

    // Plans and recurring rules.

    pub fn add_plan(
        &self,
        starts_at: NaiveDateTime,
        duration_minutes: u32,
        attribution: Attribution,
    ) -> Result<PlannedActivity, TrackerError> {
        let plan = PlannedActivity {
            id: next_id("pln"),
            date: date_key(starts_at),
            starts_at,
            duration_minutes,
            attribution,
            is_logged: false,
            rule_id: None,
            occurrence_date: None,
        };
        let mut runtime = self.lock_runtime()?;
        ensure_attribution(&runtime, &plan.attribution)?;
        let plan = runtime.plans.add_plan(plan)?;
        self.persist(&runtime, &[Collection::Plans]);
        info!(command = "add_plan", plan_id = %plan.id, "plan added");
        Ok(plan)
    }

    pub fn update_plan(&self, plan_id: &str, patch: PlanPatch) -> Result<PlannedActivity, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        if let Some(attribution) = &patch.attribution {
            ensure_attribution(&runtime, attribution)?;
        }
        let plan = runtime.plans.update_plan(plan_id, patch)?;
        self.persist(&runtime, &[Collection::Plans]);
        info!(command = "update_plan", plan_id, "plan updated");
        Ok(plan)
    }

    pub fn delete_plan(&self, plan_id: &str) -> Result<PlannedActivity, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let removed = runtime.plans.delete_plan(plan_id)?;
        self.persist(&runtime, &[Collection::Plans]);
        info!(command = "delete_plan", plan_id, "plan deleted");
        Ok(removed)
    }

    pub fn add_rule(
        &self,
        attribution: Attribution,
        start_time: String,
        duration_minutes: u32,
        frequency: Frequency,
    ) -> Result<RecurringRule, TrackerError> {
        validate_hhmm(&start_time, "rule.start_time").map_err(TrackerError::InvalidInput)?;
        let rule = RecurringRule {
            id: next_id("rul"),
            attribution,
            start_time,
            duration_minutes,
            frequency,
        };
        let mut runtime = self.lock_runtime()?;
        ensure_attribution(&runtime, &rule.attribution)?;
        let rule = runtime.plans.add_rule(rule)?;
        self.persist(&runtime, &[Collection::Rules]);
        info!(command = "add_rule", rule_id = %rule.id, "recurring rule added");
        Ok(rule)
    }

    pub fn update_rule(&self, rule: RecurringRule) -> Result<RecurringRule, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        ensure_attribution(&runtime, &rule.attribution)?;
        let rule = runtime.plans.update_rule(rule)?;
        self.persist(&runtime, &[Collection::Rules]);
        info!(command = "update_rule", rule_id = %rule.id, "recurring rule updated");
        Ok(rule)
    }

    pub fn delete_rule(&self, rule_id: &str) -> Result<RecurringRule, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let removed = runtime.plans.delete_rule(rule_id)?;
        self.persist(&runtime, &[Collection::Rules]);
        info!(command = "delete_rule", rule_id, "recurring rule deleted");
        Ok(removed)
    }

    pub fn plans_on(&self, date: NaiveDate) -> Result<Vec<DayPlan>, TrackerError> {
        Ok(self.lock_runtime()?.plans.plans_on(date))
    }

    pub fn resolve_plan(&self, handle: &PlanHandle) -> Result<Option<DayPlan>, TrackerError> {
        Ok(self.lock_runtime()?.plans.resolve(handle))
    }

    pub fn promote_ghost(
        &self,
        rule_id: &str,
        date: NaiveDate,
    ) -> Result<Option<PlannedActivity>, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let promoted = runtime.plans.promote_ghost(rule_id, date);
        match &promoted {
            Some(plan) => {
                self.persist(&runtime, &[Collection::Plans]);
                info!(command = "promote_ghost", rule_id, plan_id = %plan.id, "ghost promoted");
            }
            None => debug!(command = "promote_ghost", rule_id, "rule no longer exists"),
        }
        Ok(promoted)
    }

    pub fn move_plan(
        &self,
        handle: &PlanHandle,
        new_start: NaiveDateTime,
    ) -> Result<PlannedActivity, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let moved = runtime.plans.move_occurrence(handle, new_start)?;
        self.persist(&runtime, &[Collection::Plans]);
        info!(command = "move_plan", plan_id = %moved.id, starts_at = %moved.starts_at, "plan moved");
        Ok(moved)
    }

    pub fn toggle_plan_logged(&self, handle: &PlanHandle) -> Result<ToggleOutcome, TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let state = &mut *runtime;
        let outcome = state.plans.toggle_log(
            handle,
            &mut state.ledger,
            &mut state.tasks,
            self.settings.block_seconds(),
        )?;
        match &outcome {
            ToggleOutcome::Logged { plan, session } => {
                self.persist(
                    &runtime,
                    &[Collection::Plans, Collection::Sessions, Collection::Tasks],
                );
                info!(command = "toggle_plan_logged", plan_id = %plan.id, session_id = %session.id, "plan logged");
            }
            ToggleOutcome::Unlogged { plan } => {
                self.persist(&runtime, &[Collection::Plans]);
                info!(command = "toggle_plan_logged", plan_id = %plan.id, "plan unlogged");
            }
            ToggleOutcome::NotesRequired { plan } => {
                // A ghost may have been promoted on the way.
                self.persist(&runtime, &[Collection::Plans]);
                debug!(command = "toggle_plan_logged", plan_id = %plan.id, "notes required");
            }
        }
        Ok(outcome)
    }

    pub fn complete_plan(
        &self,
        handle: &PlanHandle,
        notes: String,
    ) -> Result<(PlannedActivity, TimerSession), TrackerError> {
        let mut runtime = self.lock_runtime()?;
        let state = &mut *runtime;
        let (plan, session) =
            state
                .plans
                .complete_plan(handle, notes, &mut state.ledger, &mut state.tasks)?;
        self.persist(
            &runtime,
            &[Collection::Plans, Collection::Sessions, Collection::Tasks],
        );
        info!(command = "complete_plan", plan_id = %plan.id, session_id = %session.id, "plan completed");
        Ok((plan, session))
    }

    // Gap suggestions.

    pub fn safe_duration_forward(
        &self,
        from: NaiveDateTime,
        desired_minutes: u32,
    ) -> Result<u32, TrackerError> {
        let scheduler = self.gap_scheduler(date_key(from))?;
        Ok(scheduler.safe_duration_forward(from, desired_minutes))
    }

    pub fn safe_window_backward(
        &self,
        to: NaiveDateTime,
        desired_minutes: u32,
    ) -> Result<FillWindow, TrackerError> {
        let scheduler = self.gap_scheduler(date_key(to))?;
        Ok(scheduler.safe_window_backward(to, desired_minutes))
    }

    pub fn free_slots(&self, date: NaiveDate) -> Result<Vec<BusyInterval>, TrackerError> {
        Ok(self.gap_scheduler(date)?.free_slots())
    }

    fn gap_scheduler(&self, date: NaiveDate) -> Result<GapScheduler, TrackerError> {
        let now = self.now();
        let runtime = self.lock_runtime()?;
        let mut busy = runtime
            .ledger
            .sessions_on(date)
            .iter()
            .map(|session| {
                let end = session.ended_at.unwrap_or(now).max(session.started_at);
                BusyInterval::new(session.started_at, end)
            })
            .collect::<Vec<_>>();
        busy.extend(
            runtime
                .plans
                .plans_on(date)
                .iter()
                .map(|plan| BusyInterval::new(plan.starts_at(), plan.ends_at())),
        );
        if let Some(timer) = runtime.timer.active() {
            if date_key(timer.started_at) == date && timer.started_at < now {
                busy.push(BusyInterval::new(timer.started_at, now));
            }
        }
        Ok(GapScheduler::new(
            date,
            self.settings.day_bounds(),
            busy,
            self.settings.minimum_fill_minutes,
            Duration::seconds(i64::from(self.settings.gap_buffer_seconds)),
        ))
    }

    // Snapshots and export.

    pub fn export_snapshot(&self) -> Result<String, TrackerError> {
        let exported_at = self.now();
        let runtime = self.lock_runtime()?;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            exported_at: Some(exported_at),
            tasks: runtime.tasks.tasks().to_vec(),
            clients: runtime.clients.clone(),
            projects: runtime.projects.clone(),
            sessions: runtime.ledger.sessions().to_vec(),
            plans: runtime.plans.plans().to_vec(),
            recurring_rules: runtime.plans.rules().to_vec(),
            active_timer: runtime.timer.active().cloned(),
        };
        let payload = snapshot::to_json(&snapshot)?;
        info!(command = "export_snapshot", sessions = snapshot.sessions.len(), "snapshot exported");
        Ok(payload)
    }

    pub fn import_snapshot(&self, raw: &str, strategy: ImportStrategy) -> Result<(), TrackerError> {
        let snapshot = snapshot::parse(raw)?;
        let mut runtime = self.lock_runtime()?;
        match strategy {
            ImportStrategy::Merge => {
                runtime.tasks.merge(snapshot.tasks);
                merge_by_id(&mut runtime.clients, snapshot.clients, |client| &client.id);
                merge_by_id(&mut runtime.projects, snapshot.projects, |project| &project.id);
                runtime.ledger.merge(snapshot.sessions);
                runtime.plans.merge(snapshot.plans, snapshot.recurring_rules);
            }
            ImportStrategy::Overwrite => {
                runtime.tasks.replace_all(snapshot.tasks);
                runtime.clients = snapshot.clients;
                runtime.projects = snapshot.projects;
                runtime.ledger.replace_all(snapshot.sessions);
                runtime.plans.replace_all(snapshot.plans, snapshot.recurring_rules);
                runtime.timer.replace(None);
                runtime.reminders.clear();
            }
        }
        let state = &mut *runtime;
        state.tasks.recompute_totals(state.ledger.sessions());
        self.persist(&runtime, &ALL_COLLECTIONS);
        info!(command = "import_snapshot", ?strategy, "snapshot imported");
        Ok(())
    }

    pub fn day_rows(&self, date: NaiveDate) -> Result<Vec<ExportRow>, TrackerError> {
        let runtime = self.lock_runtime()?;
        let sessions = runtime.ledger.sessions_on(date);
        Ok(day_rows(
            &sessions,
            &runtime.tasks,
            &runtime.clients,
            &runtime.projects,
        ))
    }

    pub fn day_table(&self, date: NaiveDate) -> Result<String, TrackerError> {
        let rows = self.day_rows(date)?;
        info!(command = "day_table", %date, rows = rows.len(), "day exported");
        Ok(render_table(&rows))
    }

    // Reminders.

    pub fn scan_reminders(&self) -> Result<Vec<Notification>, TrackerError> {
        let now = self.now();
        let lead = minutes(self.settings.reminder_lead_minutes);
        let mut runtime = self.lock_runtime()?;
        let day_plans = runtime.plans.plans_on(date_key(now));
        let state = &mut *runtime;
        let tasks = &state.tasks;
        let notifications = state.reminders.scan(&day_plans, now, lead, |attribution| {
            attribution_title(tasks, attribution)
        });
        if !notifications.is_empty() {
            info!(command = "scan_reminders", count = notifications.len(), "plans starting soon");
        }
        Ok(notifications)
    }
}

fn ensure_task_ref(runtime: &RuntimeState, target: &TaskRef) -> Result<(), TrackerError> {
    if runtime.tasks.get(&target.task_id).is_none() {
        return Err(TrackerError::not_found("task", target.task_id.clone()));
    }
    if let Some(subtask_id) = &target.subtask_id {
        if !runtime.tasks.contains(&target.task_id, Some(subtask_id)) {
            return Err(TrackerError::not_found("subtask", subtask_id.clone()));
        }
    }
    Ok(())
}

fn ensure_attribution(runtime: &RuntimeState, attribution: &Attribution) -> Result<(), TrackerError> {
    attribution.validate().map_err(TrackerError::InvalidInput)?;
    match attribution {
        Attribution::Task {
            task_id,
            subtask_id,
        } => ensure_task_ref(
            runtime,
            &TaskRef {
                task_id: task_id.clone(),
                subtask_id: subtask_id.clone(),
            },
        ),
        Attribution::Project { project_id, .. } => {
            if runtime.projects.iter().any(|project| &project.id == project_id) {
                Ok(())
            } else {
                Err(TrackerError::not_found("project", project_id.clone()))
            }
        }
        Attribution::Quick { .. } => Ok(()),
    }
}

fn attribution_title(tasks: &TaskBook, attribution: &Attribution) -> String {
    match attribution {
        Attribution::Task {
            task_id,
            subtask_id,
        } => {
            let Some(task) = tasks.get(task_id) else {
                return String::new();
            };
            subtask_id
                .as_deref()
                .and_then(|subtask_id| task.subtask(subtask_id))
                .map(|subtask| subtask.title.clone())
                .unwrap_or_else(|| task.title.clone())
        }
        Attribution::Quick { title, .. } | Attribution::Project { title, .. } => title.clone(),
    }
}

fn merge_by_id<T, F>(current: &mut Vec<T>, incoming: Vec<T>, id: F)
where
    F: Fn(&T) -> &String,
{
    for item in incoming {
        match current.iter().position(|candidate| id(candidate) == id(&item)) {
            Some(index) => current[index] = item,
            None => current.push(item),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
