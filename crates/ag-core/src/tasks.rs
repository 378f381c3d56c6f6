use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{StoreError, TaskError};
use crate::fsio;
use crate::memory::MemoryStore;
use crate::types::{
    MemoryCategory, MemoryEntry, NewTask, Payload, Task, TaskCounts, TaskId, TaskOutcome,
    TaskResult, TaskStatus,
};

/// Queue order: priority descending, then creation order.
pub fn queue_order(a: &Task, b: &Task) -> Ordering {
    b.priority.cmp(&a.priority).then(a.id.cmp(&b.id))
}

// ---------------------------------------------------------------------------
// TaskUpdate
// ---------------------------------------------------------------------------

/// A requested status change together with what it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn started() -> Self {
        Self::to(TaskStatus::InProgress)
    }

    pub fn completed(result: TaskResult) -> Self {
        Self {
            result: Some(result),
            ..Self::to(TaskStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::to(TaskStatus::Failed)
        }
    }

    pub fn requeued() -> Self {
        Self::to(TaskStatus::Pending)
    }

    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct QueueFile {
    next_id: TaskId,
    tasks: Vec<Task>,
}

/// Persistent work queue backed by a single `tasks.json`.
pub struct TaskQueue {
    path: PathBuf,
    state: QueueFile,
}

impl TaskQueue {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut state: QueueFile = fsio::read_json(&path)?.unwrap_or_default();
        let max_id = state.tasks.iter().map(|t| t.id).max().unwrap_or(0);
        state.next_id = state.next_id.max(max_id + 1);
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn enqueue(&mut self, new: NewTask, now: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let mut next = self.state.clone();
        let id = next.next_id;
        next.next_id += 1;
        next.tasks.push(Task {
            id,
            description: new.description,
            status: TaskStatus::Pending,
            priority: new.priority,
            skill: new.skill,
            tags: new.tags,
            delegated_to: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
        });
        self.commit(next)?;
        info!(task_id = id, "task enqueued");
        Ok(id)
    }

    /// The pending task that should run next, if any.
    pub fn next_pending(&self) -> Option<Task> {
        self.state
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by(|a, b| queue_order(a, b))
            .cloned()
    }

    /// Every pending task in execution order.
    pub fn pending(&self) -> Vec<Task> {
        let mut pending: Vec<Task> = self
            .state
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(queue_order);
        pending
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.state.tasks.iter().find(|t| t.id == id)
    }

    /// All tasks in creation order.
    pub fn list(&self) -> &[Task] {
        &self.state.tasks
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts::tally(&self.state.tasks)
    }

    /// Apply a status transition.
    ///
    /// The outcome entry is appended to `memory` before `tasks.json` is
    /// written. If a previous attempt got as far as the memory append, the
    /// existing entry is reused instead of writing a second one.
    pub fn mark(
        &mut self,
        memory: &mut MemoryStore,
        id: TaskId,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<Task, TaskError> {
        let idx = self
            .state
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotFound(id))?;
        let current = &self.state.tasks[idx];
        if !current.status.can_transition_to(&update.status) {
            return Err(TaskError::InvalidTransition {
                task_id: id,
                from: current.status,
                to: update.status,
            });
        }

        let from = current.status;
        let mut task = current.clone();
        task.status = update.status;
        task.revision += 1;
        task.updated_at = now;
        match update.status {
            TaskStatus::Completed => {
                task.completed_at = Some(now);
                task.result = update.result;
                task.error = None;
            }
            TaskStatus::Failed => {
                task.completed_at = Some(now);
                task.error = update.error;
            }
            TaskStatus::Pending | TaskStatus::InProgress => {}
        }

        if memory
            .find_task_outcome(id, task.status, task.revision)
            .is_none()
        {
            let outcome = TaskOutcome {
                task_id: id,
                revision: task.revision,
                from,
                to: task.status,
                description: task.description.clone(),
                skill: task.skill.clone(),
                delegated_to: task.delegated_to,
                result: task.result.clone(),
                error: task.error.clone(),
            };
            let mut tags = vec!["task".to_string(), format!("task:{id}"), task.status.to_string()];
            if let Some(skill) = &task.skill {
                tags.push(format!("skill:{skill}"));
            }
            memory.append(
                MemoryEntry::new(MemoryCategory::TaskOutcome, Payload::TaskOutcome(outcome), now)
                    .with_tags(tags),
            )?;
        } else {
            debug!(task_id = id, status = %task.status, "outcome already recorded, not duplicating");
        }

        let mut next = self.state.clone();
        next.tasks[idx] = task.clone();
        self.commit(next)?;
        debug!(task_id = id, %from, to = %task.status, "task transitioned");
        Ok(task)
    }

    /// Return tasks stranded `in_progress` by a crash to `pending`.
    pub fn requeue_in_progress(
        &mut self,
        memory: &mut MemoryStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskId>, TaskError> {
        let stranded: Vec<TaskId> = self
            .state
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .map(|t| t.id)
            .collect();
        for id in &stranded {
            self.mark(memory, *id, TaskUpdate::requeued(), now)?;
            info!(task_id = id, "requeued task left in progress");
        }
        Ok(stranded)
    }

    /// Record which helper a task is delegated to.
    pub fn set_delegate(&mut self, id: TaskId, helper_id: Uuid) -> Result<(), TaskError> {
        let idx = self
            .state
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(TaskError::NotFound(id))?;
        if self.state.tasks[idx].delegated_to == Some(helper_id) {
            return Ok(());
        }
        let mut next = self.state.clone();
        next.tasks[idx].delegated_to = Some(helper_id);
        self.commit(next)?;
        Ok(())
    }

    fn commit(&mut self, next: QueueFile) -> Result<(), StoreError> {
        fsio::write_json_atomic(&self.path, &next)?;
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFilter;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn open(dir: &Path) -> (TaskQueue, MemoryStore) {
        (
            TaskQueue::open(dir.join("tasks.json")).unwrap(),
            MemoryStore::open(dir.join("memory")).unwrap(),
        )
    }

    #[test]
    fn ids_are_sequential_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, _) = open(dir.path());
        assert_eq!(queue.enqueue(NewTask::new("a"), now()).unwrap(), 1);
        assert_eq!(queue.enqueue(NewTask::new("b"), now()).unwrap(), 2);

        let (mut queue, _) = open(dir.path());
        assert_eq!(queue.list().len(), 2);
        assert_eq!(queue.enqueue(NewTask::new("c"), now()).unwrap(), 3);
    }

    #[test]
    fn next_pending_prefers_priority_then_creation() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, mut memory) = open(dir.path());
        for p in [5, 5, 9] {
            queue.enqueue(NewTask::new(format!("p{p}")).priority(p), now()).unwrap();
        }

        let order: Vec<TaskId> = queue.pending().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![3, 1, 2]);

        let mut executed = Vec::new();
        while let Some(task) = queue.next_pending() {
            queue.mark(&mut memory, task.id, TaskUpdate::started(), now()).unwrap();
            queue
                .mark(&mut memory, task.id, TaskUpdate::completed(TaskResult::new("ok")), now())
                .unwrap();
            executed.push(task.id);
        }
        assert_eq!(executed, vec![3, 1, 2]);
    }

    #[test]
    fn terminal_twice_is_rejected_with_a_single_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, mut memory) = open(dir.path());
        let id = queue.enqueue(NewTask::new("once"), now()).unwrap();
        queue.mark(&mut memory, id, TaskUpdate::started(), now()).unwrap();
        queue
            .mark(&mut memory, id, TaskUpdate::completed(TaskResult::new("done")), now())
            .unwrap();

        let err = queue
            .mark(&mut memory, id, TaskUpdate::completed(TaskResult::new("again")), now())
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::Completed,
                ..
            }
        ));

        let completed = memory.query(
            &MemoryFilter::new()
                .category(MemoryCategory::TaskOutcome)
                .tag(format!("task:{id}"))
                .tag("completed"),
        );
        assert_eq!(completed.len(), 1);
        assert_eq!(queue.get(id).unwrap().result, Some(TaskResult::new("done")));
    }

    #[test]
    fn skipping_in_progress_is_invalid_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, mut memory) = open(dir.path());
        let id = queue.enqueue(NewTask::new("x"), now()).unwrap();
        let before = memory.len();
        let err = queue
            .mark(&mut memory, id, TaskUpdate::completed(TaskResult::new("x")), now())
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(memory.len(), before);
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, mut memory) = open(dir.path());
        let err = queue
            .mark(&mut memory, 99, TaskUpdate::started(), now())
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound(99)));
    }

    #[test]
    fn retry_after_failed_persist_does_not_duplicate_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, mut memory) = open(dir.path());
        let id = queue.enqueue(NewTask::new("flaky disk"), now()).unwrap();

        // Simulate a crash after the outcome was appended but before tasks.json
        // was written: the outcome exists, the queue still says pending.
        memory
            .append(
                MemoryEntry::new(
                    MemoryCategory::TaskOutcome,
                    Payload::TaskOutcome(TaskOutcome {
                        task_id: id,
                        revision: 1,
                        from: TaskStatus::Pending,
                        to: TaskStatus::InProgress,
                        description: "flaky disk".into(),
                        skill: None,
                        delegated_to: None,
                        result: None,
                        error: None,
                    }),
                    now(),
                )
                .with_tags(["task", "in_progress"]),
            )
            .unwrap();
        let before = memory.len();

        queue.mark(&mut memory, id, TaskUpdate::started(), now()).unwrap();
        assert_eq!(memory.len(), before);
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn requeue_cycle_records_every_transition() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, mut memory) = open(dir.path());
        let id = queue.enqueue(NewTask::new("crashy"), now()).unwrap();
        queue.mark(&mut memory, id, TaskUpdate::started(), now()).unwrap();

        let requeued = queue.requeue_in_progress(&mut memory, now()).unwrap();
        assert_eq!(requeued, vec![id]);
        queue.mark(&mut memory, id, TaskUpdate::started(), now()).unwrap();

        let started = memory.query(
            &MemoryFilter::new()
                .tag(format!("task:{id}"))
                .tag("in_progress"),
        );
        assert_eq!(started.len(), 2);
        assert_eq!(queue.counts().in_progress, 1);
    }

    #[test]
    fn delegate_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut queue, _) = open(dir.path());
        let id = queue.enqueue(NewTask::new("x").skill("research"), now()).unwrap();
        let helper = Uuid::new_v4();
        queue.set_delegate(id, helper).unwrap();

        let (queue, _) = open(dir.path());
        assert_eq!(queue.get(id).unwrap().delegated_to, Some(helper));
    }
}
