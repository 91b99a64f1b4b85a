use crate::application::ledger::{SessionLedger, TaskBook};
use crate::domain::models::{
    next_id, Attribution, PlanKind, PlannedActivity, RecurringRule, TimerSession,
};
use crate::domain::recurrence::{evaluate, DayPlan, PlanHandle};
use crate::domain::time::{at_time_of_day, date_key, round_to_block};
use crate::infrastructure::error::TrackerError;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanPatch {
    pub starts_at: Option<NaiveDateTime>,
    pub duration_minutes: Option<u32>,
    pub attribution: Option<Attribution>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToggleOutcome {
    Unlogged { plan: PlannedActivity },
    NotesRequired { plan: PlannedActivity },
    Logged {
        plan: PlannedActivity,
        session: TimerSession,
    },
}

#[derive(Debug, Clone, Default)]
pub struct PlanStore {
    plans: Vec<PlannedActivity>,
    rules: Vec<RecurringRule>,
}

impl PlanStore {
    pub fn new(plans: Vec<PlannedActivity>, rules: Vec<RecurringRule>) -> Self {
        Self { plans, rules }
    }

    pub fn plans(&self) -> &[PlannedActivity] {
        &self.plans
    }

    pub fn rules(&self) -> &[RecurringRule] {
        &self.rules
    }

    pub fn get(&self, plan_id: &str) -> Option<&PlannedActivity> {
        self.plans.iter().find(|plan| plan.id == plan_id)
    }

    pub fn rule(&self, rule_id: &str) -> Option<&RecurringRule> {
        self.rules.iter().find(|rule| rule.id == rule_id)
    }

    pub fn add_plan(&mut self, plan: PlannedActivity) -> Result<PlannedActivity, TrackerError> {
        plan.validate().map_err(TrackerError::InvalidInput)?;
        if self.get(&plan.id).is_some() {
            return Err(TrackerError::InvalidInput(format!(
                "plan already exists: {}",
                plan.id
            )));
        }
        self.plans.push(plan.clone());
        Ok(plan)
    }

    pub fn update_plan(
        &mut self,
        plan_id: &str,
        patch: PlanPatch,
    ) -> Result<PlannedActivity, TrackerError> {
        let plan = self
            .plans
            .iter_mut()
            .find(|plan| plan.id == plan_id)
            .ok_or_else(|| TrackerError::not_found("plan", plan_id))?;

        let mut updated = plan.clone();
        if let Some(starts_at) = patch.starts_at {
            if updated.rule_id.is_some() && updated.occurrence_date.is_none() {
                updated.occurrence_date = Some(updated.date);
            }
            updated.starts_at = starts_at;
            updated.date = date_key(starts_at);
        }
        if let Some(duration_minutes) = patch.duration_minutes {
            updated.duration_minutes = duration_minutes;
        }
        if let Some(attribution) = patch.attribution {
            updated.attribution = attribution;
        }
        updated.validate().map_err(TrackerError::InvalidInput)?;
        *plan = updated.clone();
        Ok(updated)
    }

    pub fn delete_plan(&mut self, plan_id: &str) -> Result<PlannedActivity, TrackerError> {
        let index = self
            .plans
            .iter()
            .position(|plan| plan.id == plan_id)
            .ok_or_else(|| TrackerError::not_found("plan", plan_id))?;
        Ok(self.plans.remove(index))
    }

    pub fn add_rule(&mut self, rule: RecurringRule) -> Result<RecurringRule, TrackerError> {
        rule.validate().map_err(TrackerError::InvalidInput)?;
        if self.rule(&rule.id).is_some() {
            return Err(TrackerError::InvalidInput(format!(
                "rule already exists: {}",
                rule.id
            )));
        }
        self.rules.push(rule.clone());
        Ok(rule)
    }

    pub fn update_rule(&mut self, rule: RecurringRule) -> Result<RecurringRule, TrackerError> {
        rule.validate().map_err(TrackerError::InvalidInput)?;
        let existing = self
            .rules
            .iter_mut()
            .find(|candidate| candidate.id == rule.id)
            .ok_or_else(|| TrackerError::not_found("rule", rule.id.clone()))?;
        *existing = rule.clone();
        Ok(rule)
    }

    pub fn delete_rule(&mut self, rule_id: &str) -> Result<RecurringRule, TrackerError> {
        let index = self
            .rules
            .iter()
            .position(|rule| rule.id == rule_id)
            .ok_or_else(|| TrackerError::not_found("rule", rule_id))?;
        Ok(self.rules.remove(index))
    }

    fn override_for(&self, rule_id: &str, date: NaiveDate) -> Option<&PlannedActivity> {
        self.plans.iter().find(|plan| plan.overrides(rule_id, date))
    }

    pub fn promote_ghost(&mut self, rule_id: &str, date: NaiveDate) -> Option<PlannedActivity> {
        if let Some(existing) = self.override_for(rule_id, date) {
            return Some(existing.clone());
        }
        let rule = self.rule(rule_id)?;
        let Some(starts_at) = at_time_of_day(date, &rule.start_time) else {
            tracing::warn!(rule_id, start_time = %rule.start_time, "rule has unreadable time of day");
            return None;
        };
        let plan = PlannedActivity {
            id: next_id("pln"),
            date,
            starts_at,
            duration_minutes: rule.duration_minutes,
            attribution: rule.attribution.clone(),
            is_logged: false,
            rule_id: Some(rule.id.clone()),
            occurrence_date: Some(date),
        };
        self.plans.push(plan.clone());
        Some(plan)
    }

    pub fn move_ghost(
        &mut self,
        rule_id: &str,
        date: NaiveDate,
        new_start: NaiveDateTime,
    ) -> Result<PlannedActivity, TrackerError> {
        self.move_occurrence(&PlanHandle::ghost(rule_id, date), new_start)
    }

    pub fn move_occurrence(
        &mut self,
        handle: &PlanHandle,
        new_start: NaiveDateTime,
    ) -> Result<PlannedActivity, TrackerError> {
        let plan_id = self.persisted_id(handle)?;
        self.update_plan(
            &plan_id,
            PlanPatch {
                starts_at: Some(new_start),
                ..PlanPatch::default()
            },
        )
    }

    pub fn resolve(&self, handle: &PlanHandle) -> Option<DayPlan> {
        match handle {
            PlanHandle::Persisted { id } => self.get(id).cloned().map(DayPlan::Persisted),
            PlanHandle::Ghost { rule_id, date } => {
                if let Some(existing) = self.override_for(rule_id, *date) {
                    return Some(DayPlan::Persisted(existing.clone()));
                }
                let rule = self.rule(rule_id)?;
                evaluate(rule, *date, &self.plans).map(DayPlan::Ghost)
            }
        }
    }

    fn persisted_id(&mut self, handle: &PlanHandle) -> Result<String, TrackerError> {
        match handle {
            PlanHandle::Persisted { id } => self
                .get(id)
                .map(|plan| plan.id.clone())
                .ok_or_else(|| TrackerError::not_found("plan", id.clone())),
            PlanHandle::Ghost { rule_id, date } => self
                .promote_ghost(rule_id, *date)
                .map(|plan| plan.id)
                .ok_or_else(|| TrackerError::not_found("rule", rule_id.clone())),
        }
    }

    pub fn toggle_log(
        &mut self,
        handle: &PlanHandle,
        ledger: &mut SessionLedger,
        tasks: &mut TaskBook,
        block_seconds: i64,
    ) -> Result<ToggleOutcome, TrackerError> {
        let plan_id = self.persisted_id(handle)?;
        let plan = self
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| TrackerError::not_found("plan", plan_id.clone()))?;

        if plan.is_logged {
            let plan = self.set_logged(&plan_id, false)?;
            return Ok(ToggleOutcome::Unlogged { plan });
        }

        match plan.kind() {
            PlanKind::Task | PlanKind::Project => Ok(ToggleOutcome::NotesRequired { plan }),
            PlanKind::Quick => {
                let notes = match &plan.attribution {
                    Attribution::Quick { title, .. } => title.clone(),
                    _ => String::new(),
                };
                let session = ledger.add(
                    TimerSession {
                        id: next_id("ses"),
                        started_at: plan.starts_at,
                        ended_at: Some(quick_plan_end(&plan, block_seconds)),
                        notes,
                        is_manual: true,
                        attribution: plan.attribution.clone(),
                    },
                    tasks,
                )?;
                let plan = self.set_logged(&plan_id, true)?;
                Ok(ToggleOutcome::Logged { plan, session })
            }
        }
    }

    pub fn complete_plan(
        &mut self,
        handle: &PlanHandle,
        notes: String,
        ledger: &mut SessionLedger,
        tasks: &mut TaskBook,
    ) -> Result<(PlannedActivity, TimerSession), TrackerError> {
        let plan_id = self.persisted_id(handle)?;
        let plan = self
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| TrackerError::not_found("plan", plan_id.clone()))?;
        if plan.is_logged {
            return Err(TrackerError::InvalidInput(format!(
                "plan already logged: {plan_id}"
            )));
        }

        let session = ledger.add(
            TimerSession {
                id: next_id("ses"),
                started_at: plan.starts_at,
                ended_at: Some(plan.ends_at()),
                notes,
                is_manual: true,
                attribution: plan.attribution.clone(),
            },
            tasks,
        )?;
        let plan = self.set_logged(&plan_id, true)?;
        Ok((plan, session))
    }

    fn set_logged(&mut self, plan_id: &str, is_logged: bool) -> Result<PlannedActivity, TrackerError> {
        let plan = self
            .plans
            .iter_mut()
            .find(|plan| plan.id == plan_id)
            .ok_or_else(|| TrackerError::not_found("plan", plan_id))?;
        plan.is_logged = is_logged;
        Ok(plan.clone())
    }

    pub(crate) fn clear_logged_near(
        &mut self,
        started_at: NaiveDateTime,
        tolerance: Duration,
    ) -> Vec<String> {
        let mut cleared = Vec::new();
        for plan in self.plans.iter_mut().filter(|plan| plan.is_logged) {
            let distance = (plan.starts_at - started_at).abs();
            if distance <= tolerance {
                plan.is_logged = false;
                cleared.push(plan.id.clone());
            }
        }
        cleared
    }

    pub fn plans_on(&self, date: NaiveDate) -> Vec<DayPlan> {
        let mut day = self
            .plans
            .iter()
            .filter(|plan| plan.date == date)
            .cloned()
            .map(DayPlan::Persisted)
            .collect::<Vec<_>>();
        day.extend(
            self.rules
                .iter()
                .filter_map(|rule| evaluate(rule, date, &self.plans))
                .map(DayPlan::Ghost),
        );
        day.sort_by(|left, right| left.starts_at().cmp(&right.starts_at()));
        day
    }

    pub(crate) fn replace_all(&mut self, plans: Vec<PlannedActivity>, rules: Vec<RecurringRule>) {
        self.plans = plans;
        self.rules = rules;
    }

    pub(crate) fn merge(&mut self, plans: Vec<PlannedActivity>, rules: Vec<RecurringRule>) {
        for plan in plans {
            match self.plans.iter_mut().find(|candidate| candidate.id == plan.id) {
                Some(existing) => *existing = plan,
                None => self.plans.push(plan),
            }
        }
        for rule in rules {
            match self.rules.iter_mut().find(|candidate| candidate.id == rule.id) {
                Some(existing) => *existing = rule,
                None => self.rules.push(rule),
            }
        }
    }
}

pub fn quick_plan_end(plan: &PlannedActivity, block_seconds: i64) -> NaiveDateTime {
    let billed = round_to_block(i64::from(plan.duration_minutes) * 60, block_seconds);
    plan.starts_at + Duration::seconds(billed)
}
