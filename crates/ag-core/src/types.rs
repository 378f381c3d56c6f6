use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reflection::Reflection;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// `InProgress -> Pending` exists only for requeueing work stranded by a
    /// crash. Terminal states accept nothing.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

pub const PRIORITY_HIGH: i32 = 10;
pub const PRIORITY_MEDIUM: i32 = 5;
pub const PRIORITY_LOW: i32 = 1;

/// Parse a priority given either as an integer or as `high`/`medium`/`low`.
pub fn parse_priority(s: &str) -> Option<i32> {
    match s.trim().to_ascii_lowercase().as_str() {
        "high" => Some(PRIORITY_HIGH),
        "medium" => Some(PRIORITY_MEDIUM),
        "low" => Some(PRIORITY_LOW),
        other => other.parse().ok(),
    }
}

/// Output of a successful skill execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub summary: String,
    /// Learning notes; each becomes its own memory entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TaskResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            notes: Vec::new(),
            data: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i32,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub delegated_to: Option<Uuid>,
    /// Bumped on every accepted transition; keys the matching outcome entry.
    #[serde(default)]
    pub revision: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Input to [`crate::tasks::TaskQueue::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub description: String,
    pub priority: i32,
    pub skill: Option<String>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            priority: PRIORITY_MEDIUM,
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn skill(mut self, skill: impl Into<String>) -> Self {
        self.skill = Some(skill.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }

    /// Completed over all tasks, `0.0` for an empty queue.
    pub fn completion_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.completed as f64 / total as f64,
        }
    }
}

/// A pending task as listed in a [`DailyPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: TaskId,
    pub description: String,
    pub priority: i32,
    #[serde(default)]
    pub skill: Option<String>,
}

/// Pending work grouped by priority band, written at the first day pulse of
/// a date. Each band keeps execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPlan {
    pub date: NaiveDate,
    pub high: Vec<PlannedTask>,
    pub medium: Vec<PlannedTask>,
    pub low: Vec<PlannedTask>,
    /// Tasks a single day pulse may run.
    pub budget: usize,
}

impl DailyPlan {
    /// Band `pending` (already in execution order): `high` from
    /// [`PRIORITY_HIGH`], `medium` from [`PRIORITY_MEDIUM`], the rest `low`.
    pub fn from_pending(date: NaiveDate, pending: &[Task], budget: usize) -> Self {
        let mut plan = Self {
            date,
            high: Vec::new(),
            medium: Vec::new(),
            low: Vec::new(),
            budget,
        };
        for task in pending {
            let item = PlannedTask {
                id: task.id,
                description: task.description.clone(),
                priority: task.priority,
                skill: task.skill.clone(),
            };
            match task.priority {
                p if p >= PRIORITY_HIGH => plan.high.push(item),
                p if p >= PRIORITY_MEDIUM => plan.medium.push(item),
                _ => plan.low.push(item),
            }
        }
        plan
    }

    pub fn total(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "plan for {}: {} task(s), {} high, {} medium, {} low, up to {} per pulse",
            self.date,
            self.total(),
            self.high.len(),
            self.medium.len(),
            self.low.len(),
            self.budget
        )
    }
}

// ---------------------------------------------------------------------------
// HelperAgent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperAgent {
    pub id: Uuid,
    /// Owning agent.
    pub parent_id: String,
    pub name: String,
    pub specialization: String,
    pub mission: String,
    pub tasks_completed: u64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PulsePhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulsePhase {
    Day,
    Night,
}

impl fmt::Display for PulsePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulsePhase::Day => f.write_str("day"),
            PulsePhase::Night => f.write_str("night"),
        }
    }
}

impl FromStr for PulsePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(PulsePhase::Day),
            "night" => Ok(PulsePhase::Night),
            other => Err(format!("unknown phase '{other}', expected day or night")),
        }
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    TaskOutcome,
    Reflection,
    Idea,
    SystemEvent,
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryCategory::TaskOutcome => "task_outcome",
            MemoryCategory::Reflection => "reflection",
            MemoryCategory::Idea => "idea",
            MemoryCategory::SystemEvent => "system_event",
        })
    }
}

impl FromStr for MemoryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "task_outcome" => Ok(MemoryCategory::TaskOutcome),
            "reflection" => Ok(MemoryCategory::Reflection),
            "idea" => Ok(MemoryCategory::Idea),
            "system_event" => Ok(MemoryCategory::SystemEvent),
            other => Err(format!("unknown memory category '{other}'")),
        }
    }
}

/// A status transition recorded by the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    /// Task revision after the transition.
    pub revision: u32,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub description: String,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub delegated_to: Option<Uuid>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseEventKind {
    Started,
    Completed,
    Skipped,
    Failed,
}

impl PulseEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PulseEventKind::Started => "started",
            PulseEventKind::Completed => "completed",
            PulseEventKind::Skipped => "skipped",
            PulseEventKind::Failed => "failed",
        }
    }
}

/// Content of a memory entry.
///
/// `Opaque` carries arbitrary JSON for payloads that have no typed shape yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text {
        text: String,
    },
    TaskOutcome(TaskOutcome),
    Reflection(Box<Reflection>),
    DailyPlan(DailyPlan),
    HelperSpawned {
        helper_id: Uuid,
        name: String,
        specialization: String,
        mission: String,
    },
    PulseEvent {
        phase: PulsePhase,
        event: PulseEventKind,
        #[serde(default)]
        detail: Option<String>,
    },
    Error {
        stage: String,
        message: String,
    },
    Opaque {
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    /// Assigned by the store on append; defines chronological order.
    #[serde(default)]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub category: MemoryCategory,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub content: Payload,
}

impl MemoryEntry {
    pub fn new(category: MemoryCategory, content: Payload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            timestamp,
            category,
            tags: BTreeSet::new(),
            content,
        }
    }

    pub fn text(category: MemoryCategory, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(category, Payload::Text { text: text.into() }, timestamp)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn as_reflection(&self) -> Option<&Reflection> {
        match &self.content {
            Payload::Reflection(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_task_outcome(&self) -> Option<&TaskOutcome> {
        match &self.content {
            Payload::TaskOutcome(o) => Some(o),
            _ => None,
        }
    }

    /// One-line human summary, used in reflections and the CLI.
    pub fn summary(&self) -> String {
        match &self.content {
            Payload::Text { text } => text.clone(),
            Payload::TaskOutcome(o) => match (&o.to, &o.result, &o.error) {
                (TaskStatus::Completed, Some(r), _) => {
                    format!("task #{} completed: {}", o.task_id, r.summary)
                }
                (TaskStatus::Failed, _, Some(err)) => {
                    format!("task #{} failed: {}", o.task_id, err)
                }
                _ => format!("task #{} {} -> {}: {}", o.task_id, o.from, o.to, o.description),
            },
            Payload::Reflection(r) => format!("reflection for night {} (rev {})", r.night, r.revision),
            Payload::DailyPlan(plan) => plan.summary(),
            Payload::HelperSpawned {
                name,
                specialization,
                ..
            } => format!("spawned helper {name} ({specialization})"),
            Payload::PulseEvent {
                phase,
                event,
                detail,
            } => match detail {
                Some(d) => format!("{phase} pulse {}: {d}", event.as_str()),
                None => format!("{phase} pulse {}", event.as_str()),
            },
            Payload::Error { stage, message } => format!("error in {stage}: {message}"),
            Payload::Opaque { value } => value.to_string(),
        }
    }
}
