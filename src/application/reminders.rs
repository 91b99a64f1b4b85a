use crate::application::notifications::Notification;
use crate::application::tracker::Tracker;
use crate::domain::models::Attribution;
use crate::domain::recurrence::{DayPlan, PlanHandle};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ReminderTracker {
    reminded: HashSet<PlanHandle>,
}

impl ReminderTracker {
    pub fn was_reminded(&self, handle: &PlanHandle) -> bool {
        self.reminded.contains(handle)
    }

    pub fn scan<F>(
        &mut self,
        day_plans: &[DayPlan],
        now: NaiveDateTime,
        lead: Duration,
        title_of: F,
    ) -> Vec<Notification>
    where
        F: Fn(&Attribution) -> String,
    {
        let horizon = now + lead;
        let mut notifications = Vec::new();
        for plan in day_plans {
            let starts_at = plan.starts_at();
            if plan.is_logged() || starts_at <= now || starts_at > horizon {
                continue;
            }
            let handle = plan.handle();
            let occurrence = occurrence_key(plan);
            if self.reminded.contains(&handle) || self.reminded.contains(&occurrence) {
                continue;
            }
            self.reminded.insert(occurrence);
            self.reminded.insert(handle.clone());
            let seconds_until = (starts_at - now).num_seconds();
            notifications.push(Notification::PlanStartingSoon {
                handle,
                title: title_of(plan.attribution()),
                starts_at,
                minutes_until: (seconds_until + 59) / 60,
            });
        }
        notifications
    }

    pub(crate) fn clear(&mut self) {
        self.reminded.clear();
    }
}

// Promoted plans share the ghost's key so a promotion never re-announces the occurrence.
fn occurrence_key(plan: &DayPlan) -> PlanHandle {
    match plan {
        DayPlan::Persisted(persisted) => match &persisted.rule_id {
            Some(rule_id) => PlanHandle::ghost(
                rule_id.clone(),
                persisted.occurrence_date.unwrap_or(persisted.date),
            ),
            None => plan.handle(),
        },
        DayPlan::Ghost(_) => plan.handle(),
    }
}

pub fn spawn_reminder_loop(
    tracker: Arc<Tracker>,
    period: std::time::Duration,
    sender: mpsc::Sender<Notification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(period_secs = period.as_secs(), "reminder loop started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let notifications = match tracker.scan_reminders() {
                Ok(notifications) => notifications,
                Err(error) => {
                    warn!(%error, "reminder scan failed");
                    continue;
                }
            };
            for notification in notifications {
                if sender.send(notification).await.is_err() {
                    debug!("reminder receiver closed");
                    return;
                }
            }
            if sender.is_closed() {
                debug!("reminder receiver closed");
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PlannedActivity;
    use crate::domain::recurrence::GhostInstance;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date")
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        day().and_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn quick(title: &str) -> Attribution {
        Attribution::Quick {
            title: title.to_string(),
            client_id: None,
        }
    }

    fn plans() -> Vec<DayPlan> {
        vec![
            DayPlan::Persisted(PlannedActivity {
                id: "pln-soon".to_string(),
                date: day(),
                starts_at: at(10, 8),
                duration_minutes: 30,
                attribution: quick("Design sync"),
                is_logged: false,
                rule_id: None,
                occurrence_date: None,
            }),
            DayPlan::Persisted(PlannedActivity {
                id: "pln-logged".to_string(),
                date: day(),
                starts_at: at(10, 5),
                duration_minutes: 30,
                attribution: quick("Already done"),
                is_logged: true,
                rule_id: None,
                occurrence_date: None,
            }),
            DayPlan::Ghost(GhostInstance {
                rule_id: "rul-1".to_string(),
                date: day(),
                starts_at: at(10, 10),
                duration_minutes: 15,
                attribution: quick("Standup"),
            }),
            DayPlan::Persisted(PlannedActivity {
                id: "pln-later".to_string(),
                date: day(),
                starts_at: at(11, 0),
                duration_minutes: 30,
                attribution: quick("Later"),
                is_logged: false,
                rule_id: None,
                occurrence_date: None,
            }),
        ]
    }

    fn title(attribution: &Attribution) -> String {
        match attribution {
            Attribution::Quick { title, .. } => title.clone(),
            _ => String::new(),
        }
    }

    #[test]
    fn reminds_each_upcoming_plan_once() {
        let mut reminders = ReminderTracker::default();
        let first = reminders.scan(&plans(), at(10, 0), Duration::minutes(10), title);
        assert_eq!(
            first,
            vec![
                Notification::PlanStartingSoon {
                    handle: PlanHandle::persisted("pln-soon"),
                    title: "Design sync".to_string(),
                    starts_at: at(10, 8),
                    minutes_until: 8,
                },
                Notification::PlanStartingSoon {
                    handle: PlanHandle::ghost("rul-1", day()),
                    title: "Standup".to_string(),
                    starts_at: at(10, 10),
                    minutes_until: 10,
                },
            ]
        );

        let second = reminders.scan(&plans(), at(10, 1), Duration::minutes(10), title);
        assert!(second.is_empty());
        assert!(reminders.was_reminded(&PlanHandle::ghost("rul-1", day())));
    }

    #[test]
    fn started_plans_are_not_announced() {
        let mut reminders = ReminderTracker::default();
        let notifications = reminders.scan(&plans(), at(10, 9), Duration::minutes(10), title);
        assert_eq!(notifications.len(), 1);
        assert!(matches!(
            &notifications[0],
            Notification::PlanStartingSoon { handle, .. } if *handle == PlanHandle::ghost("rul-1", day())
        ));
    }

    #[test]
    fn promoted_occurrence_is_not_announced_again() {
        let mut reminders = ReminderTracker::default();
        let first = reminders.scan(&plans(), at(10, 0), Duration::minutes(10), title);
        assert_eq!(first.len(), 2);

        let promoted = vec![DayPlan::Persisted(PlannedActivity {
            id: "pln-standup".to_string(),
            date: day(),
            starts_at: at(10, 10),
            duration_minutes: 15,
            attribution: quick("Standup"),
            is_logged: false,
            rule_id: Some("rul-1".to_string()),
            occurrence_date: Some(day()),
        })];
        let second = reminders.scan(&promoted, at(10, 2), Duration::minutes(10), title);
        assert!(second.is_empty());
        assert!(reminders.was_reminded(&PlanHandle::persisted("pln-standup")));
    }

    #[tokio::test]
    async fn loop_delivers_notifications_until_receiver_drops() {
        use crate::infrastructure::config::TrackerSettings;
        use crate::infrastructure::kv_store::{InMemoryKeyValueStore, KeyValueStore};
        use crate::domain::models::Frequency;

        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::default());
        let tracker = Tracker::with_store(store, TrackerSettings::default())
            .with_now_provider(Arc::new(|| at(9, 25)));
        tracker
            .add_rule(quick("Standup"), "09:30".to_string(), 15, Frequency::Daily)
            .expect("rule");
        let tracker = Arc::new(tracker);

        let (sender, mut receiver) = mpsc::channel(4);
        let handle = spawn_reminder_loop(
            Arc::clone(&tracker),
            std::time::Duration::from_millis(10),
            sender,
        );

        let notification = receiver.recv().await.expect("one reminder");
        assert!(matches!(
            notification,
            Notification::PlanStartingSoon { ref title, minutes_until: 5, .. } if title == "Standup"
        ));

        drop(receiver);
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("loop stops once the receiver is gone")
            .expect("loop task does not panic");
    }
}
