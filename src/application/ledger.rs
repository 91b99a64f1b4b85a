use crate::application::plans::PlanStore;
use crate::domain::models::{Attribution, EntityRef, Subtask, Task, TimerSession};
use crate::domain::time::date_key;
use crate::infrastructure::error::TrackerError;
use chrono::{Duration, NaiveDate, NaiveDateTime};

#[derive(Debug, Clone, Default)]
pub struct TaskBook {
    tasks: Vec<Task>,
}

impl TaskBook {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn contains(&self, task_id: &str, subtask_id: Option<&str>) -> bool {
        match (self.get(task_id), subtask_id) {
            (Some(task), Some(subtask_id)) => task.subtask(subtask_id).is_some(),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    // Totals are carried over from the stored copy; only sessions move them.
    pub fn upsert(&mut self, mut task: Task) {
        if let Some(existing) = self.tasks.iter_mut().find(|candidate| candidate.id == task.id) {
            task.total_seconds = existing.total_seconds;
            for subtask in &mut task.subtasks {
                subtask.total_seconds = existing
                    .subtask(&subtask.id)
                    .map(|previous| previous.total_seconds)
                    .unwrap_or(0);
            }
            *existing = task;
        } else {
            self.tasks.push(task);
        }
    }

    pub fn add_subtask(&mut self, task_id: &str, subtask: Subtask) -> Result<(), TrackerError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| TrackerError::not_found("task", task_id))?;
        task.subtasks.push(subtask);
        Ok(())
    }

    pub fn remove(&mut self, task_id: &str) -> Option<Task> {
        let index = self.tasks.iter().position(|task| task.id == task_id)?;
        Some(self.tasks.remove(index))
    }

    pub fn grand_total_seconds(&self) -> u64 {
        self.tasks
            .iter()
            .map(Task::rolled_up_seconds)
            .fold(0, u64::saturating_add)
    }

    pub(crate) fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    pub(crate) fn merge(&mut self, incoming: Vec<Task>) {
        for task in incoming {
            match self.tasks.iter_mut().find(|candidate| candidate.id == task.id) {
                Some(existing) => *existing = task,
                None => self.tasks.push(task),
            }
        }
    }

    // Sessions for deleted tasks are kept as history and credit nothing.
    pub(crate) fn recompute_totals(&mut self, sessions: &[TimerSession]) {
        for task in &mut self.tasks {
            task.total_seconds = 0;
            for subtask in &mut task.subtasks {
                subtask.total_seconds = 0;
            }
        }
        for session in sessions {
            let Some(entity) = session.attribution.entity() else {
                continue;
            };
            if let Some(total) = self.total_mut(&entity) {
                *total = total.saturating_add(session.elapsed_seconds());
            }
        }
    }

    fn apply(&mut self, entity: &EntityRef, seconds: u64) {
        match self.total_mut(entity) {
            Some(total) => *total = total.saturating_add(seconds),
            None => tracing::warn!(?entity, seconds, "cannot apply time to missing entity"),
        }
    }

    fn reverse(&mut self, entity: &EntityRef, seconds: u64) {
        match self.total_mut(entity) {
            Some(total) => *total = total.saturating_sub(seconds),
            None => tracing::warn!(?entity, seconds, "cannot reverse time on missing entity"),
        }
    }

    fn total_mut(&mut self, entity: &EntityRef) -> Option<&mut u64> {
        match entity {
            EntityRef::Task(task_id) => self
                .tasks
                .iter_mut()
                .find(|task| &task.id == task_id)
                .map(|task| &mut task.total_seconds),
            EntityRef::Subtask {
                task_id,
                subtask_id,
            } => self
                .tasks
                .iter_mut()
                .find(|task| &task.id == task_id)?
                .subtasks
                .iter_mut()
                .find(|subtask| &subtask.id == subtask_id)
                .map(|subtask| &mut subtask.total_seconds),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<Option<NaiveDateTime>>,
    pub notes: Option<String>,
    pub is_manual: Option<bool>,
    pub attribution: Option<Attribution>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionLedger {
    sessions: Vec<TimerSession>,
}

impl SessionLedger {
    pub fn new(sessions: Vec<TimerSession>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &[TimerSession] {
        &self.sessions
    }

    pub fn get(&self, session_id: &str) -> Option<&TimerSession> {
        self.sessions.iter().find(|session| session.id == session_id)
    }

    pub fn add(
        &mut self,
        session: TimerSession,
        tasks: &mut TaskBook,
    ) -> Result<TimerSession, TrackerError> {
        check_range(&session)?;
        session.validate().map_err(TrackerError::InvalidInput)?;
        if self.get(&session.id).is_some() {
            return Err(TrackerError::InvalidInput(format!(
                "session already exists: {}",
                session.id
            )));
        }

        if let Some(entity) = session.attribution.entity() {
            tasks.apply(&entity, session.elapsed_seconds());
        }
        self.sessions.push(session.clone());
        Ok(session)
    }

    pub fn update(
        &mut self,
        session_id: &str,
        patch: SessionPatch,
        tasks: &mut TaskBook,
    ) -> Result<TimerSession, TrackerError> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.id == session_id)
            .ok_or_else(|| TrackerError::not_found("session", session_id))?;

        let previous = self.sessions[index].clone();
        let mut updated = previous.clone();
        if let Some(started_at) = patch.started_at {
            updated.started_at = started_at;
        }
        if let Some(ended_at) = patch.ended_at {
            updated.ended_at = ended_at;
        }
        if let Some(notes) = patch.notes {
            updated.notes = notes;
        }
        if let Some(is_manual) = patch.is_manual {
            updated.is_manual = is_manual;
        }
        if let Some(attribution) = patch.attribution {
            updated.attribution = attribution;
        }
        check_range(&updated)?;
        updated.validate().map_err(TrackerError::InvalidInput)?;

        let old_seconds = previous.elapsed_seconds();
        let new_seconds = updated.elapsed_seconds();
        match (previous.attribution.entity(), updated.attribution.entity()) {
            (Some(old_entity), Some(new_entity)) if old_entity == new_entity => {
                if new_seconds >= old_seconds {
                    tasks.apply(&new_entity, new_seconds - old_seconds);
                } else {
                    tasks.reverse(&new_entity, old_seconds - new_seconds);
                }
            }
            (old_entity, new_entity) => {
                if let Some(old_entity) = old_entity {
                    tasks.reverse(&old_entity, old_seconds);
                }
                if let Some(new_entity) = new_entity {
                    tasks.apply(&new_entity, new_seconds);
                }
            }
        }

        self.sessions[index] = updated.clone();
        Ok(updated)
    }

    // Sessions carry no plan id: a logged plan starting within `tolerance` of the
    // session start is taken to be the one it completed.
    pub fn delete(
        &mut self,
        session_id: &str,
        tasks: &mut TaskBook,
        plans: &mut PlanStore,
        tolerance: Duration,
    ) -> Result<TimerSession, TrackerError> {
        let index = self
            .sessions
            .iter()
            .position(|session| session.id == session_id)
            .ok_or_else(|| TrackerError::not_found("session", session_id))?;
        let removed = self.sessions.remove(index);

        if let Some(entity) = removed.attribution.entity() {
            tasks.reverse(&entity, removed.elapsed_seconds());
        }
        let unlogged = plans.clear_logged_near(removed.started_at, tolerance);
        if !unlogged.is_empty() {
            tracing::debug!(session_id, ?unlogged, "cleared logged flag on matching plans");
        }
        Ok(removed)
    }

    pub fn sessions_on(&self, date: NaiveDate) -> Vec<TimerSession> {
        let mut sessions = self
            .sessions
            .iter()
            .filter(|session| date_key(session.started_at) == date)
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by(|left, right| left.started_at.cmp(&right.started_at));
        sessions
    }

    pub fn latest_end_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        self.sessions
            .iter()
            .filter(|session| date_key(session.started_at) == date)
            .filter_map(|session| session.ended_at)
            .max()
    }

    pub fn attributed_seconds(&self) -> u64 {
        self.sessions
            .iter()
            .filter(|session| session.attribution.entity().is_some())
            .map(TimerSession::elapsed_seconds)
            .sum()
    }

    pub(crate) fn replace_all(&mut self, sessions: Vec<TimerSession>) {
        self.sessions = sessions;
    }

    pub(crate) fn merge(&mut self, incoming: Vec<TimerSession>) {
        for session in incoming {
            match self
                .sessions
                .iter_mut()
                .find(|candidate| candidate.id == session.id)
            {
                Some(existing) => *existing = session,
                None => self.sessions.push(session),
            }
        }
    }
}

fn check_range(session: &TimerSession) -> Result<(), TrackerError> {
    match session.ended_at {
        Some(ended_at) if ended_at < session.started_at => Err(TrackerError::InvalidRange),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PlannedActivity, TaskRef};
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 16)
            .expect("valid date")
            .and_hms_opt(hour, minute, 0)
            .expect("valid time")
    }

    fn book() -> TaskBook {
        TaskBook::new(vec![
            Task {
                id: "tsk-a".to_string(),
                title: "Alpha".to_string(),
                client_id: None,
                ticket: None,
                total_seconds: 0,
                subtasks: vec![Subtask {
                    id: "sub-a1".to_string(),
                    title: "Alpha one".to_string(),
                    total_seconds: 0,
                }],
                created_at: at(8, 0),
            },
            Task {
                id: "tsk-b".to_string(),
                title: "Beta".to_string(),
                client_id: None,
                ticket: None,
                total_seconds: 0,
                subtasks: Vec::new(),
                created_at: at(8, 0),
            },
        ])
    }

    fn session(id: &str, start: NaiveDateTime, end: NaiveDateTime, target: TaskRef) -> TimerSession {
        TimerSession {
            id: id.to_string(),
            started_at: start,
            ended_at: Some(end),
            notes: String::new(),
            is_manual: true,
            attribution: target.into(),
        }
    }

    fn total(tasks: &TaskBook, task_id: &str) -> u64 {
        tasks.get(task_id).expect("task exists").total_seconds
    }

    #[test]
    fn add_applies_raw_elapsed_seconds() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        ledger
            .add(session("s1", at(9, 0), at(9, 7), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add session");
        assert_eq!(total(&tasks, "tsk-a"), 420);
    }

    #[test]
    fn add_to_subtask_credits_subtask_only() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        ledger
            .add(
                session("s1", at(9, 0), at(9, 30), TaskRef::subtask("tsk-a", "sub-a1")),
                &mut tasks,
            )
            .expect("add session");
        let task = tasks.get("tsk-a").expect("task");
        assert_eq!(task.total_seconds, 0);
        assert_eq!(task.subtask("sub-a1").expect("subtask").total_seconds, 1_800);
        assert_eq!(task.rolled_up_seconds(), 1_800);
    }

    #[test]
    fn update_same_target_applies_difference() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        ledger
            .add(session("s1", at(9, 0), at(10, 0), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add");
        ledger
            .update(
                "s1",
                SessionPatch {
                    ended_at: Some(Some(at(9, 30))),
                    ..SessionPatch::default()
                },
                &mut tasks,
            )
            .expect("update");
        assert_eq!(total(&tasks, "tsk-a"), 1_800);
    }

    #[test]
    fn update_moves_time_between_targets() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        ledger
            .add(session("s1", at(9, 0), at(10, 0), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add");
        ledger
            .update(
                "s1",
                SessionPatch {
                    attribution: Some(TaskRef::task("tsk-b").into()),
                    started_at: Some(at(9, 30)),
                    ..SessionPatch::default()
                },
                &mut tasks,
            )
            .expect("update");
        assert_eq!(total(&tasks, "tsk-a"), 0);
        assert_eq!(total(&tasks, "tsk-b"), 1_800);
    }

    #[test]
    fn update_rejects_inverted_range_without_mutation() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        ledger
            .add(session("s1", at(9, 0), at(10, 0), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add");
        let result = ledger.update(
            "s1",
            SessionPatch {
                ended_at: Some(Some(at(8, 0))),
                ..SessionPatch::default()
            },
            &mut tasks,
        );
        assert!(matches!(result, Err(TrackerError::InvalidRange)));
        assert_eq!(ledger.get("s1").expect("session").ended_at, Some(at(10, 0)));
        assert_eq!(total(&tasks, "tsk-a"), 3_600);
    }

    #[test]
    fn update_and_delete_unknown_ids_fail() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        let mut plans = PlanStore::default();
        assert!(matches!(
            ledger.update("missing", SessionPatch::default(), &mut tasks),
            Err(TrackerError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.delete("missing", &mut tasks, &mut plans, Duration::milliseconds(999)),
            Err(TrackerError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_reverses_and_unlogs_matching_plan() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        let day = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let mut plans = PlanStore::new(
            vec![PlannedActivity {
                id: "pln-1".to_string(),
                date: day,
                starts_at: at(9, 0),
                duration_minutes: 60,
                attribution: TaskRef::task("tsk-a").into(),
                is_logged: true,
                rule_id: None,
                occurrence_date: None,
            }],
            Vec::new(),
        );
        ledger
            .add(session("s1", at(9, 0), at(10, 0), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add");

        let removed = ledger
            .delete("s1", &mut tasks, &mut plans, Duration::milliseconds(999))
            .expect("delete");
        assert_eq!(removed.id, "s1");
        assert_eq!(total(&tasks, "tsk-a"), 0);
        assert!(!plans.get("pln-1").expect("plan").is_logged);
    }

    #[test]
    fn sessions_on_is_day_scoped_and_ordered() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        ledger
            .add(session("late", at(14, 0), at(15, 0), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add");
        ledger
            .add(session("early", at(9, 0), at(9, 30), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add");
        let next_day = at(9, 0) + Duration::days(1);
        ledger
            .add(
                session("tomorrow", next_day, next_day + Duration::hours(1), TaskRef::task("tsk-b")),
                &mut tasks,
            )
            .expect("add");

        let day = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let ids = ledger
            .sessions_on(day)
            .into_iter()
            .map(|session| session.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["early".to_string(), "late".to_string()]);
        assert_eq!(ledger.latest_end_on(day), Some(at(15, 0)));
    }

    #[test]
    fn recompute_totals_follows_sessions_not_stored_totals() {
        let mut tasks = book();
        let mut ledger = SessionLedger::default();
        ledger
            .add(session("s1", at(9, 0), at(9, 30), TaskRef::task("tsk-a")), &mut tasks)
            .expect("add");
        let mut inflated = tasks.get("tsk-a").expect("task").clone();
        inflated.total_seconds = 99_999;
        tasks.merge(vec![inflated]);

        let mut sessions = ledger.sessions().to_vec();
        sessions.push(session("s2", at(10, 0), at(10, 6), TaskRef::subtask("tsk-a", "sub-a1")));
        sessions.push(session("s3", at(11, 0), at(12, 0), TaskRef::task("tsk-gone")));
        tasks.recompute_totals(&sessions);

        let task = tasks.get("tsk-a").expect("task");
        assert_eq!(task.total_seconds, 1_800);
        assert_eq!(task.subtask("sub-a1").expect("subtask").total_seconds, 360);
        assert_eq!(total(&tasks, "tsk-b"), 0);
        assert_eq!(tasks.grand_total_seconds(), 2_160);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Resize { index: usize, minutes: i64 },
        Retarget { index: usize, target: usize },
        Delete { index: usize },
    }

    fn targets() -> Vec<TaskRef> {
        vec![
            TaskRef::task("tsk-a"),
            TaskRef::subtask("tsk-a", "sub-a1"),
            TaskRef::task("tsk-b"),
        ]
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..8, 0i64..240).prop_map(|(index, minutes)| Op::Resize { index, minutes }),
            (0usize..8, 0usize..3).prop_map(|(index, target)| Op::Retarget { index, target }),
            (0usize..8).prop_map(|index| Op::Delete { index }),
        ]
    }

    proptest! {
        #[test]
        fn totals_match_sessions_after_arbitrary_edits(
            initial in proptest::collection::vec((0i64..600, 1i64..240, 0usize..3), 1..8),
            ops in proptest::collection::vec(op_strategy(), 0..24)
        ) {
            let mut tasks = book();
            let mut ledger = SessionLedger::default();
            let mut plans = PlanStore::default();
            let targets = targets();

            for (index, (offset, length, target)) in initial.iter().enumerate() {
                let start = at(0, 0) + Duration::minutes(*offset);
                ledger.add(
                    session(&format!("s{index}"), start, start + Duration::minutes(*length), targets[*target].clone()),
                    &mut tasks,
                ).expect("add");
            }

            for op in ops {
                let ids = ledger.sessions().iter().map(|session| session.id.clone()).collect::<Vec<_>>();
                if ids.is_empty() {
                    break;
                }
                match op {
                    Op::Resize { index, minutes } => {
                        let id = &ids[index % ids.len()];
                        let start = ledger.get(id).expect("session").started_at;
                        ledger.update(id, SessionPatch {
                            ended_at: Some(Some(start + Duration::minutes(minutes))),
                            ..SessionPatch::default()
                        }, &mut tasks).expect("resize");
                    }
                    Op::Retarget { index, target } => {
                        let id = &ids[index % ids.len()];
                        ledger.update(id, SessionPatch {
                            attribution: Some(targets[target].clone().into()),
                            ..SessionPatch::default()
                        }, &mut tasks).expect("retarget");
                    }
                    Op::Delete { index } => {
                        let id = ids[index % ids.len()].clone();
                        ledger.delete(&id, &mut tasks, &mut plans, Duration::milliseconds(999)).expect("delete");
                    }
                }
                prop_assert_eq!(tasks.grand_total_seconds(), ledger.attributed_seconds());
            }
            prop_assert_eq!(tasks.grand_total_seconds(), ledger.attributed_seconds());
        }
    }
}
