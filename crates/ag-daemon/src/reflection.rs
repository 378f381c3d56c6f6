//! Builds the nightly [`Reflection`] from what the night routine gathered.

use std::collections::BTreeMap;

use ag_core::reflection::{HelperReport, PerceptionDigest, RecentNote, Reflection};
use ag_core::tasks::queue_order;
use ag_core::types::{HelperAgent, MemoryEntry, Payload, Task, TaskCounts, TaskStatus};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

const MAX_ITEMS: usize = 5;

pub struct ReflectionInputs<'a> {
    pub night: NaiveDate,
    pub now: DateTime<Utc>,
    pub revision: u32,
    pub supersedes: Option<Uuid>,
    pub perception: PerceptionDigest,
    pub helper_reports: Vec<HelperReport>,
    /// Newest first.
    pub recent: &'a [MemoryEntry],
    pub tasks: &'a [Task],
    /// Start of the window that counts as "today" for failures.
    pub since: DateTime<Utc>,
    pub budget: usize,
}

pub fn synthesize(inputs: ReflectionInputs<'_>) -> Reflection {
    let counts = TaskCounts::tally(inputs.tasks);
    let improvements = improvements(&inputs, &counts);
    let focus = focus(&inputs);
    Reflection {
        night: inputs.night,
        revision: inputs.revision,
        supersedes: inputs.supersedes,
        generated_at: inputs.now,
        recent: inputs
            .recent
            .iter()
            .map(|e| RecentNote {
                entry_id: e.id,
                timestamp: e.timestamp,
                category: e.category,
                summary: e.summary(),
            })
            .collect(),
        assessment: counts.into(),
        perception: inputs.perception,
        helper_reports: inputs.helper_reports,
        improvements,
        focus,
    }
}

/// Per-helper totals plus delegated completions since `since`.
pub fn helper_reports(
    helpers: &[HelperAgent],
    tasks: &[Task],
    since: DateTime<Utc>,
) -> Vec<HelperReport> {
    helpers
        .iter()
        .map(|h| HelperReport {
            helper_id: h.id,
            name: h.name.clone(),
            specialization: h.specialization.clone(),
            tasks_completed: h.tasks_completed,
            completed_recently: tasks
                .iter()
                .filter(|t| {
                    t.delegated_to == Some(h.id)
                        && t.status == TaskStatus::Completed
                        && t.completed_at.is_some_and(|at| at >= since)
                })
                .count() as u64,
        })
        .collect()
}

fn improvements(inputs: &ReflectionInputs<'_>, counts: &TaskCounts) -> Vec<String> {
    let mut out = Vec::new();

    let mut failed: Vec<&Task> = inputs
        .tasks
        .iter()
        .filter(|t| {
            t.status == TaskStatus::Failed && t.completed_at.is_some_and(|at| at >= inputs.since)
        })
        .collect();
    failed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    if !failed.is_empty() {
        let listed: Vec<String> = failed
            .iter()
            .take(3)
            .map(|t| match &t.error {
                Some(err) => format!("#{} {} ({err})", t.id, t.description),
                None => format!("#{} {}", t.id, t.description),
            })
            .collect();
        out.push(format!(
            "Investigate {} failed task(s): {}",
            failed.len(),
            listed.join("; ")
        ));
    }

    let down: Vec<&str> = inputs.perception.unavailable().map(|(name, _)| name).collect();
    if !down.is_empty() {
        out.push(format!("Restore perception sources: {}", down.join(", ")));
    }

    let mut stages: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in inputs.recent {
        if let Payload::Error { stage, .. } = &entry.content {
            *stages.entry(stage.as_str()).or_default() += 1;
        }
    }
    for (stage, n) in stages.into_iter().filter(|(_, n)| *n >= 2) {
        out.push(format!("Recurring errors in {stage} ({n} in recent memory)"));
    }

    if counts.pending > inputs.budget {
        out.push(format!(
            "Backlog of {} pending tasks exceeds the per-pulse budget of {}",
            counts.pending, inputs.budget
        ));
    }

    if counts.completed + counts.failed >= 4 && counts.completion_rate() < 0.5 {
        out.push(format!(
            "Completion rate is {:.0}%; split large tasks into smaller ones",
            counts.completion_rate() * 100.0
        ));
    }

    if out.is_empty() {
        out.push("No problems detected; keep the current routine".to_string());
    }
    out.truncate(MAX_ITEMS);
    out
}

fn focus(inputs: &ReflectionInputs<'_>) -> Vec<String> {
    let mut pending: Vec<&Task> = inputs
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .collect();
    pending.sort_by(|a, b| queue_order(a, b));

    let mut out: Vec<String> = pending
        .iter()
        .take(3)
        .map(|t| format!("#{} {} (priority {})", t.id, t.description, t.priority))
        .collect();
    if out.is_empty() {
        out.push("Queue is empty; plan new tasks toward the mission".to_string());
    }
    for idle in inputs
        .helper_reports
        .iter()
        .filter(|h| h.completed_recently == 0)
    {
        out.push(format!(
            "Find {} work for {}",
            idle.specialization, idle.name
        ));
    }
    out.truncate(MAX_ITEMS);
    out
}
