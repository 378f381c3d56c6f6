//! Skills execute tasks. The engine only sees the [`Skill`] trait; the
//! registry routes a task to the skill named by `task.skill`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use ag_core::config::Config;
use ag_core::types::{Task, TaskResult};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Name of the built-in skill used for tasks that name none.
pub const JOURNAL_SKILL: &str = "journal";

const SUMMARY_MAX_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkillFailure {
    #[error("no skill registered for '{0}'")]
    Unknown(String),
    #[error("task names no skill and no default skill is configured")]
    NoSkill,
    #[error("{skill}: could not start command: {reason}")]
    Spawn { skill: String, reason: String },
    #[error("{skill}: command exited with {status}: {stderr}")]
    Exited {
        skill: String,
        status: String,
        stderr: String,
    },
    #[error("{0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Skill
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, task: &Task) -> Result<TaskResult, SkillFailure>;
}

// ---------------------------------------------------------------------------
// SkillRegistry
// ---------------------------------------------------------------------------

/// Routes tasks to skills by name or alias. Itself a [`Skill`].
#[derive(Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Arc<dyn Skill>>,
    aliases: BTreeMap<String, String>,
    default_skill: Option<String>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in journal skill (also the default) plus one
    /// [`CommandSkill`] per `[skills.<name>]` section.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new().with_default(JOURNAL_SKILL);
        registry.register(Arc::new(JournalSkill));
        for (name, skill) in &config.skills {
            registry.register(Arc::new(CommandSkill::new(
                name.clone(),
                skill.command.clone(),
                skill.args.clone(),
            )));
            for alias in &skill.aliases {
                registry.alias(alias, name);
            }
        }
        debug!(skills = ?registry.names(), "skill registry built");
        registry
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        self.skills.insert(skill.name().to_ascii_lowercase(), skill);
    }

    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases
            .insert(alias.to_ascii_lowercase(), target.to_ascii_lowercase());
    }

    pub fn with_default(mut self, name: &str) -> Self {
        self.default_skill = Some(name.to_ascii_lowercase());
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Skill>> {
        let key = name.to_ascii_lowercase();
        let key = self.aliases.get(&key).unwrap_or(&key);
        self.skills.get(key).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.skills.keys().cloned().collect()
    }
}

#[async_trait]
impl Skill for SkillRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, SkillFailure> {
        let name = task
            .skill
            .as_deref()
            .or(self.default_skill.as_deref())
            .ok_or(SkillFailure::NoSkill)?;
        let skill = self
            .resolve(name)
            .ok_or_else(|| SkillFailure::Unknown(name.to_string()))?;
        info!(task_id = task.id, skill = skill.name(), "executing task");
        skill.execute(task).await
    }
}

// ---------------------------------------------------------------------------
// JournalSkill
// ---------------------------------------------------------------------------

/// Records the task description as a learning note. Needs no external tool.
pub struct JournalSkill;

#[async_trait]
impl Skill for JournalSkill {
    fn name(&self) -> &str {
        JOURNAL_SKILL
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, SkillFailure> {
        Ok(TaskResult::new(format!("noted: {}", task.description)).with_note(task.description.clone()))
    }
}

// ---------------------------------------------------------------------------
// CommandSkill
// ---------------------------------------------------------------------------

/// Runs an external command with the task description as its last argument.
///
/// The task id and skill are also exported as `GARDEN_TASK_ID` and
/// `GARDEN_TASK_SKILL`. Stdout is either a JSON [`TaskResult`] or plain
/// text: the first line is the summary and lines starting with `note:` are
/// learning notes. A non-zero exit is a failure.
pub struct CommandSkill {
    name: String,
    command: String,
    args: Vec<String>,
}

impl CommandSkill {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl Skill for CommandSkill {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, SkillFailure> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(&task.description)
            .env("GARDEN_TASK_ID", task.id.to_string())
            .env("GARDEN_TASK_SKILL", task.skill.as_deref().unwrap_or(&self.name))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SkillFailure::Spawn {
                skill: self.name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SkillFailure::Exited {
                skill: self.name.clone(),
                status: output.status.to_string(),
                stderr: truncate(stderr.trim(), SUMMARY_MAX_CHARS),
            });
        }
        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_output(stdout: &str) -> TaskResult {
    let trimmed = stdout.trim();
    if let Ok(result) = serde_json::from_str::<TaskResult>(trimmed) {
        return result;
    }
    let mut summary = None;
    let mut notes = Vec::new();
    for line in trimmed.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(note) = line.strip_prefix("note:") {
            notes.push(note.trim().to_string());
        } else if summary.is_none() {
            summary = Some(truncate(line, SUMMARY_MAX_CHARS));
        }
    }
    TaskResult {
        summary: summary.unwrap_or_else(|| "completed".to_string()),
        notes,
        data: None,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
