use crate::application::ledger::TaskBook;
use crate::domain::models::{Attribution, Client, Project, TimerSession};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportRow {
    pub ticket: String,
    pub client: String,
    pub date: String,
    pub start: String,
    pub end: String,
    pub description: String,
}

const HEADER: [&str; 6] = ["Ticket", "Client", "Date", "Start", "End", "Description"];

pub fn day_rows(
    sessions: &[TimerSession],
    tasks: &TaskBook,
    clients: &[Client],
    projects: &[Project],
) -> Vec<ExportRow> {
    let client_name = |client_id: Option<&String>| {
        client_id
            .and_then(|id| clients.iter().find(|client| &client.id == id))
            .map(|client| client.name.clone())
            .unwrap_or_default()
    };

    sessions
        .iter()
        .map(|session| {
            let (ticket, client, title) = match &session.attribution {
                Attribution::Task {
                    task_id,
                    subtask_id,
                } => match tasks.get(task_id) {
                    Some(task) => {
                        let title = subtask_id
                            .as_deref()
                            .and_then(|subtask_id| task.subtask(subtask_id))
                            .map(|subtask| format!("{} / {}", task.title, subtask.title))
                            .unwrap_or_else(|| task.title.clone());
                        (
                            task.ticket.clone().unwrap_or_default(),
                            client_name(task.client_id.as_ref()),
                            title,
                        )
                    }
                    None => (String::new(), String::new(), String::new()),
                },
                Attribution::Quick { title, client_id } => {
                    (String::new(), client_name(client_id.as_ref()), title.clone())
                }
                Attribution::Project {
                    project_id, title, ..
                } => {
                    let client_id = projects
                        .iter()
                        .find(|project| &project.id == project_id)
                        .and_then(|project| project.client_id.as_ref());
                    (String::new(), client_name(client_id), title.clone())
                }
            };

            let description = if session.notes.trim().is_empty() {
                title
            } else {
                session.notes.trim().to_string()
            };
            ExportRow {
                ticket,
                client,
                date: session.started_at.format("%Y-%m-%d").to_string(),
                start: session.started_at.format("%H:%M").to_string(),
                end: session
                    .ended_at
                    .map(|ended_at| ended_at.format("%H:%M").to_string())
                    .unwrap_or_default(),
                description,
            }
        })
        .collect()
}

pub fn render_table(rows: &[ExportRow]) -> String {
    let mut lines = vec![HEADER.join("\t")];
    for row in rows {
        let cells = [
            &row.ticket,
            &row.client,
            &row.date,
            &row.start,
            &row.end,
            &row.description,
        ];
        lines.push(
            cells
                .iter()
                .map(|cell| cell.replace(['\t', '\n', '\r'], " "))
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Subtask, Task};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 16)
            .expect("valid date")
            .and_hms_opt(hour, minute, 0)
            .expect("valid time")
    }

    fn session(id: &str, start: NaiveDateTime, end: NaiveDateTime, notes: &str, attribution: Attribution) -> TimerSession {
        TimerSession {
            id: id.to_string(),
            started_at: start,
            ended_at: Some(end),
            notes: notes.to_string(),
            is_manual: false,
            attribution,
        }
    }

    #[test]
    fn rows_resolve_ticket_and_client() {
        let tasks = TaskBook::new(vec![Task {
            id: "tsk-1".to_string(),
            title: "Billing API".to_string(),
            client_id: Some("cli-1".to_string()),
            ticket: Some("ACME-42".to_string()),
            total_seconds: 0,
            subtasks: vec![Subtask {
                id: "sub-1".to_string(),
                title: "Tests".to_string(),
                total_seconds: 0,
            }],
            created_at: at(8, 0),
        }]);
        let clients = vec![Client {
            id: "cli-1".to_string(),
            name: "Acme".to_string(),
        }];
        let projects = vec![Project {
            id: "prj-1".to_string(),
            name: "Rollout".to_string(),
            client_id: Some("cli-1".to_string()),
            milestones: Vec::new(),
        }];
        let sessions = vec![
            session(
                "ses-1",
                at(9, 0),
                at(9, 12),
                "wrote\tendpoint",
                Attribution::Task {
                    task_id: "tsk-1".to_string(),
                    subtask_id: None,
                },
            ),
            session(
                "ses-2",
                at(9, 12),
                at(9, 30),
                "",
                Attribution::Task {
                    task_id: "tsk-1".to_string(),
                    subtask_id: Some("sub-1".to_string()),
                },
            ),
            session(
                "ses-3",
                at(10, 0),
                at(10, 30),
                "",
                Attribution::Project {
                    project_id: "prj-1".to_string(),
                    milestone_id: None,
                    title: "Kickoff".to_string(),
                },
            ),
        ];

        let rows = day_rows(&sessions, &tasks, &clients, &projects);
        assert_eq!(rows[0].ticket, "ACME-42");
        assert_eq!(rows[0].client, "Acme");
        assert_eq!(rows[0].start, "09:00");
        assert_eq!(rows[0].end, "09:12");
        assert_eq!(rows[1].description, "Billing API / Tests");
        assert_eq!(rows[2].client, "Acme");
        assert_eq!(rows[2].description, "Kickoff");

        let table = render_table(&rows);
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "Ticket\tClient\tDate\tStart\tEnd\tDescription");
        assert_eq!(lines[1], "ACME-42\tAcme\t2026-02-16\t09:00\t09:12\twrote endpoint");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn empty_day_renders_header_only() {
        let table = render_table(&day_rows(&[], &TaskBook::default(), &[], &[]));
        assert_eq!(table, "Ticket\tClient\tDate\tStart\tEnd\tDescription");
    }
}
