use crate::domain::models::{next_id, ActiveTimer, Attribution, TaskRef, TimerSession};
use crate::domain::time::round_to_block;
use crate::infrastructure::error::TrackerError;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { timer: ActiveTimer },
    AlreadyRunning { timer: ActiveTimer },
    AwaitingFinalize {
        running: ActiveTimer,
        queued: Option<TaskRef>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub session: TimerSession,
    pub chained: Option<ActiveTimer>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerReadout {
    pub target: Option<TaskRef>,
    pub started_at: NaiveDateTime,
    pub elapsed_seconds: u64,
    pub pending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TimerMachine {
    active: Option<ActiveTimer>,
    queued: Option<Option<TaskRef>>,
}

impl TimerMachine {
    pub fn new(active: Option<ActiveTimer>) -> Self {
        Self {
            active,
            queued: None,
        }
    }

    pub fn active(&self) -> Option<&ActiveTimer> {
        self.active.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn queued(&self) -> Option<&Option<TaskRef>> {
        self.queued.as_ref()
    }

    pub fn start(
        &mut self,
        target: Option<TaskRef>,
        override_start: Option<NaiveDateTime>,
        now: NaiveDateTime,
        latest_session_end: Option<NaiveDateTime>,
    ) -> StartOutcome {
        if let Some(running) = &self.active {
            if running.target == target {
                return StartOutcome::AlreadyRunning {
                    timer: running.clone(),
                };
            }
            self.queued = Some(target.clone());
            return StartOutcome::AwaitingFinalize {
                running: running.clone(),
                queued: target,
            };
        }

        let started_at = override_start
            .unwrap_or_else(|| latest_session_end.map_or(now, |latest| latest.max(now)));
        let timer = ActiveTimer { target, started_at };
        self.active = Some(timer.clone());
        StartOutcome::Started { timer }
    }

    pub fn cancel(&mut self) -> Option<ActiveTimer> {
        self.queued = None;
        self.active.take()
    }

    pub fn finalize(
        &mut self,
        notes: String,
        raw_end: NaiveDateTime,
        attribution_override: Option<Attribution>,
        block_seconds: i64,
    ) -> Result<FinalizeOutcome, TrackerError> {
        let running = self
            .active
            .take()
            .ok_or_else(|| TrackerError::InvalidInput("no timer is running".to_string()))?;

        let raw_seconds = (raw_end - running.started_at).num_seconds();
        let ended_at = running.started_at + Duration::seconds(round_to_block(raw_seconds, block_seconds));
        let attribution = attribution_override.unwrap_or_else(|| {
            running
                .target
                .clone()
                .map(Attribution::from)
                .unwrap_or_else(Attribution::unallocated)
        });
        let session = TimerSession {
            id: next_id("ses"),
            started_at: running.started_at,
            ended_at: Some(ended_at),
            notes,
            is_manual: false,
            attribution,
        };

        let chained = self.queued.take().map(|target| ActiveTimer {
            target,
            started_at: ended_at,
        });
        self.active = chained.clone();
        Ok(FinalizeOutcome { session, chained })
    }

    pub fn readout(&self, now: NaiveDateTime) -> Option<TimerReadout> {
        self.active.as_ref().map(|timer| {
            let elapsed = (now - timer.started_at).num_seconds();
            TimerReadout {
                target: timer.target.clone(),
                started_at: timer.started_at,
                elapsed_seconds: u64::try_from(elapsed).unwrap_or(0),
                pending: elapsed < 0,
            }
        })
    }

    pub(crate) fn replace(&mut self, active: Option<ActiveTimer>) {
        self.active = active;
        self.queued = None;
    }
}
