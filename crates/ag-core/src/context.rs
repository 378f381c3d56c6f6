use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{StoreError, TaskError};
use crate::helpers::HelperRegistry;
use crate::memory::MemoryStore;
use crate::tasks::{TaskQueue, TaskUpdate};
use crate::types::{HelperAgent, MemoryCategory, MemoryEntry, Payload, Task, TaskId};

/// Everything one agent owns on disk: its memory, task queue and helpers.
///
/// Layout: `<state_dir>/agents/<agent_id>/{memory/entries/, tasks.json, helpers.json}`.
pub struct AgentContext {
    agent_id: String,
    root: PathBuf,
    pub memory: MemoryStore,
    pub tasks: TaskQueue,
    pub helpers: HelperRegistry,
}

impl AgentContext {
    pub fn open(state_dir: &Path, agent_id: &str) -> Result<Self, StoreError> {
        if !is_valid_agent_id(agent_id) {
            return Err(StoreError::InvalidAgentId(agent_id.to_string()));
        }
        let root = Self::agent_dir(state_dir, agent_id);
        let memory = MemoryStore::open(root.join("memory").join("entries"))?;
        let tasks = TaskQueue::open(root.join("tasks.json"))?;
        let helpers = HelperRegistry::open(root.join("helpers.json"), agent_id)?;
        info!(
            agent_id,
            root = %root.display(),
            memory_entries = memory.len(),
            tasks = tasks.list().len(),
            helpers = helpers.len(),
            "agent context opened"
        );
        Ok(Self {
            agent_id: agent_id.to_string(),
            root,
            memory,
            tasks,
            helpers,
        })
    }

    pub fn agent_dir(state_dir: &Path, agent_id: &str) -> PathBuf {
        state_dir.join("agents").join(agent_id)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Transition a task, recording the outcome in this agent's memory.
    pub fn mark_task(
        &mut self,
        id: TaskId,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<Task, TaskError> {
        self.tasks.mark(&mut self.memory, id, update, now)
    }

    pub fn requeue_in_progress(&mut self, now: DateTime<Utc>) -> Result<Vec<TaskId>, TaskError> {
        self.tasks.requeue_in_progress(&mut self.memory, now)
    }

    /// Spawn a helper and record a `helper_creation` event for it.
    pub fn spawn_helper(
        &mut self,
        specialization: &str,
        mission: &str,
        now: DateTime<Utc>,
    ) -> Result<HelperAgent, StoreError> {
        let helper = self.helpers.spawn(specialization, mission, now)?;
        let entry = MemoryEntry::new(
            MemoryCategory::SystemEvent,
            Payload::HelperSpawned {
                helper_id: helper.id,
                name: helper.name.clone(),
                specialization: helper.specialization.clone(),
                mission: helper.mission.clone(),
            },
            now,
        )
        .with_tags(["helper_creation".to_string(), specialization.to_ascii_lowercase()]);
        self.memory.append(entry)?;
        Ok(helper)
    }

    /// Append a `system_event` error entry tagged `error` and the stage name.
    pub fn record_error(
        &mut self,
        stage: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let entry = MemoryEntry::new(
            MemoryCategory::SystemEvent,
            Payload::Error {
                stage: stage.to_string(),
                message: message.into(),
            },
            now,
        )
        .with_tags(["error".to_string(), stage.to_string()]);
        self.memory.append(entry)
    }
}

fn is_valid_agent_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
