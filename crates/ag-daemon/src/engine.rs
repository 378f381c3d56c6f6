//! The pulse engine: one day or night routine against one agent's state.
//!
//! Every routine runs to completion against the [`AgentContext`]. Failures
//! of individual tasks and collaborators are recorded as memory entries and
//! never abort the pulse; only an unusable state directory does.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ag_core::clock::Clock;
use ag_core::config::{Config, ReflectionPolicy};
use ag_core::context::AgentContext;
use ag_core::error::{HelperError, StoreError, TaskError};
use ag_core::memory::MemoryFilter;
use ag_core::tasks::TaskUpdate;
use ag_core::types::{
    DailyPlan, HelperAgent, MemoryCategory, MemoryEntry, Payload, PulseEventKind, PulsePhase, Task,
};
use ag_harness::backup::{Backup, BackupBundle};
use ag_harness::notifier::{Notifier, Report};
use ag_harness::perception::PerceptionManager;
use ag_harness::retry::RetryPolicy;
use ag_harness::skill::{Skill, JOURNAL_SKILL};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::phase::{night_key, phase_at};
use crate::reflection::{helper_reports, synthesize, ReflectionInputs};
use crate::spawn::{plan_spawns, specialization_gaps};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The outbound dependencies of a pulse. Tests swap in fakes.
pub struct Collaborators {
    pub skill: Arc<dyn Skill>,
    pub perception: PerceptionManager,
    pub notifier: Arc<dyn Notifier>,
    pub backup: Arc<dyn Backup>,
    pub policy: RetryPolicy,
}

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayReport {
    /// This pulse wrote the date's plan.
    pub planned: bool,
    pub requeued: usize,
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub delegated: usize,
    /// Pending tasks remained when the budget ran out.
    pub budget_exhausted: bool,
    /// Task ids in execution order.
    pub executed: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NightReport {
    pub night: NaiveDate,
    pub reflection_id: Uuid,
    pub revision: u32,
    /// An existing reflection was kept and nothing was re-sent.
    pub skipped: bool,
    pub perception_healthy: usize,
    pub perception_total: usize,
    pub spawned: Vec<HelperAgent>,
    pub backup: Option<PathBuf>,
    pub notified: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PulseOutcome {
    Day(DayReport),
    Night(NightReport),
}

impl PulseOutcome {
    pub fn phase(&self) -> PulsePhase {
        match self {
            PulseOutcome::Day(_) => PulsePhase::Day,
            PulseOutcome::Night(_) => PulsePhase::Night,
        }
    }
}

impl fmt::Display for PulseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulseOutcome::Day(r) => write!(
                f,
                "day pulse: {} attempted, {} completed, {} failed, {} requeued",
                r.attempted, r.completed, r.failed, r.requeued
            ),
            PulseOutcome::Night(r) if r.skipped => write!(
                f,
                "night pulse: reflection for {} already recorded (revision {})",
                r.night, r.revision
            ),
            PulseOutcome::Night(r) => write!(
                f,
                "night pulse: reflection for {} revision {}, {}/{} perception sources healthy, {} helper(s) spawned",
                r.night,
                r.revision,
                r.perception_healthy,
                r.perception_total,
                r.spawned.len()
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// PulseEngine
// ---------------------------------------------------------------------------

pub struct PulseEngine {
    config: Config,
    clock: Arc<dyn Clock>,
    ctx: AgentContext,
    collaborators: Collaborators,
}

impl PulseEngine {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        ctx: AgentContext,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            clock,
            ctx,
            collaborators,
        }
    }

    /// Open the configured agent's state and build an engine around it.
    pub fn open(
        config: Config,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> Result<Self, StoreError> {
        let ctx = AgentContext::open(&config.state_dir(), &config.general.agent_id)?;
        Ok(Self::new(config, clock, ctx, collaborators))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.ctx
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn phase_now(&self) -> PulsePhase {
        phase_at(&self.config.pulse, self.now())
    }

    /// Re-read the agent's state from disk, discarding anything in memory.
    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.ctx = AgentContext::open(&self.config.state_dir(), &self.config.general.agent_id)?;
        Ok(())
    }

    /// Run the routine for the current phase, or for `phase_override`.
    pub async fn run_pulse(
        &mut self,
        phase_override: Option<PulsePhase>,
    ) -> Result<PulseOutcome, PulseError> {
        match phase_override {
            Some(phase) => self.run_phase(phase, true).await,
            None => {
                let phase = self.phase_now();
                self.run_phase(phase, false).await
            }
        }
    }

    pub async fn run_phase(
        &mut self,
        phase: PulsePhase,
        forced: bool,
    ) -> Result<PulseOutcome, PulseError> {
        info!(%phase, forced, agent_id = self.ctx.agent_id(), "pulse starting");
        self.record_pulse_event(phase, PulseEventKind::Started, forced.then(|| "override".into()))?;

        let result = match phase {
            PulsePhase::Day => self.run_day().await.map(PulseOutcome::Day),
            PulsePhase::Night => self.run_night().await.map(PulseOutcome::Night),
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(record) =
                    self.record_pulse_event(phase, PulseEventKind::Failed, Some(e.to_string()))
                {
                    warn!(error = %record, "could not record pulse failure");
                }
                return Err(e);
            }
        };

        let kind = match &outcome {
            PulseOutcome::Night(r) if r.skipped => PulseEventKind::Skipped,
            _ => PulseEventKind::Completed,
        };
        self.record_pulse_event(phase, kind, Some(outcome.to_string()))?;
        info!(%phase, "{outcome}");
        Ok(outcome)
    }

    /// Record a failure that escaped a pulse.
    pub fn record_failure(&mut self, stage: &str, message: &str) -> Result<Uuid, StoreError> {
        let now = self.now();
        self.ctx.record_error(stage, message, now)
    }

    fn record_pulse_event(
        &mut self,
        phase: PulsePhase,
        event: PulseEventKind,
        detail: Option<String>,
    ) -> Result<Uuid, StoreError> {
        let entry = MemoryEntry::new(
            MemoryCategory::SystemEvent,
            Payload::PulseEvent {
                phase,
                event,
                detail,
            },
            self.now(),
        )
        .with_tags(["pulse".to_string(), phase.to_string()]);
        self.ctx.memory.append(entry)
    }

    /// Record a non-fatal task error and carry on; storage errors propagate.
    fn absorb_task_error(&mut self, stage: &str, err: TaskError) -> Result<(), PulseError> {
        match err {
            TaskError::Store(e) => Err(e.into()),
            other => {
                warn!(stage, error = %other, "task operation rejected");
                self.record_failure(stage, &other.to_string())?;
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Day
    // -----------------------------------------------------------------------

    async fn run_day(&mut self) -> Result<DayReport, PulseError> {
        let budget = self.config.pulse.max_tasks_per_pulse;
        let mut report = DayReport::default();

        let now = self.now();
        match self.ctx.requeue_in_progress(now) {
            Ok(ids) => report.requeued = ids.len(),
            Err(e) => self.absorb_task_error("day.requeue", e)?,
        }
        report.planned = self.plan_day(now)?;

        while report.attempted < budget {
            let Some(task) = self.ctx.tasks.next_pending() else {
                break;
            };
            report.attempted += 1;
            report.executed.push(task.id);
            self.execute_task(task, &mut report).await?;
        }
        report.budget_exhausted =
            report.attempted >= budget && self.ctx.tasks.next_pending().is_some();
        if report.budget_exhausted {
            info!(budget, "task budget exhausted, remaining tasks wait for the next pulse");
        }
        Ok(report)
    }

    /// Record the date's [`DailyPlan`] unless an earlier pulse already did.
    fn plan_day(&mut self, now: DateTime<Utc>) -> Result<bool, PulseError> {
        let date = now.date_naive();
        let day_tag = format!("day:{date}");
        let filter = MemoryFilter::new().tag("daily_plan").tag(day_tag.clone()).limit(1);
        if !self.ctx.memory.query(&filter).is_empty() {
            return Ok(false);
        }

        let plan = DailyPlan::from_pending(
            date,
            &self.ctx.tasks.pending(),
            self.config.pulse.max_tasks_per_pulse,
        );
        info!(
            %date,
            tasks = plan.total(),
            high = plan.high.len(),
            medium = plan.medium.len(),
            low = plan.low.len(),
            "daily plan recorded"
        );
        let entry = MemoryEntry::new(MemoryCategory::SystemEvent, Payload::DailyPlan(plan), now)
            .with_tags(["planning".to_string(), "daily_plan".to_string(), day_tag]);
        self.ctx.memory.append(entry)?;
        Ok(true)
    }

    async fn execute_task(&mut self, task: Task, report: &mut DayReport) -> Result<(), PulseError> {
        let id = task.id;

        let helper_id = task
            .skill
            .as_deref()
            .and_then(|skill| self.ctx.helpers.find_by_specialization(skill))
            .map(|h| h.id);
        if let Some(helper_id) = helper_id {
            match self.ctx.tasks.set_delegate(id, helper_id) {
                Ok(()) => {
                    report.delegated += 1;
                    debug!(task_id = id, %helper_id, "task delegated");
                }
                Err(e) => self.absorb_task_error("day.delegate", e)?,
            }
        }

        let now = self.now();
        let task = match self.ctx.mark_task(id, TaskUpdate::started(), now) {
            Ok(task) => task,
            Err(e) => return self.absorb_task_error("day.start", e),
        };

        let skill_name = task.skill.as_deref().unwrap_or(JOURNAL_SKILL).to_string();
        let policy = self.collaborators.policy;
        let skill = Arc::clone(&self.collaborators.skill);
        let outcome = policy.run_once(&skill_name, skill.execute(&task)).await;

        let now = self.now();
        match outcome {
            Ok(result) => {
                let notes = result.notes.clone();
                if let Err(e) = self.ctx.mark_task(id, TaskUpdate::completed(result), now) {
                    return self.absorb_task_error("day.complete", e);
                }
                report.completed += 1;
                info!(task_id = id, skill = %skill_name, "task completed");

                for note in notes {
                    let entry = MemoryEntry::text(MemoryCategory::TaskOutcome, note, now)
                        .with_tags(["learning".to_string(), format!("task:{id}")]);
                    self.ctx.memory.append(entry)?;
                }

                if let Some(helper_id) = task.delegated_to {
                    match self.ctx.helpers.record_task_completion(helper_id, id) {
                        Ok(_) => {}
                        Err(HelperError::Store(e)) => return Err(e.into()),
                        Err(e) => {
                            warn!(task_id = id, error = %e, "could not credit helper");
                            self.record_failure("day.helper", &e.to_string())?;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(task_id = id, skill = %skill_name, error = %e, "task failed");
                if let Err(e) = self.ctx.mark_task(id, TaskUpdate::failed(e.to_string()), now) {
                    return self.absorb_task_error("day.fail", e);
                }
                report.failed += 1;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Night
    // -----------------------------------------------------------------------

    async fn run_night(&mut self) -> Result<NightReport, PulseError> {
        let now = self.now();
        let night = night_key(&self.config.pulse, now);

        let previous = self
            .ctx
            .memory
            .latest_reflection(night)
            .and_then(|e| e.as_reflection().map(|r| (e.id, r.revision)));
        let (revision, supersedes) = match previous {
            Some((id, revision)) => match self.config.pulse.reflection_policy {
                ReflectionPolicy::Skip => {
                    info!(%night, revision, "reflection already recorded for this night");
                    return Ok(NightReport {
                        night,
                        reflection_id: id,
                        revision,
                        skipped: true,
                        perception_healthy: 0,
                        perception_total: 0,
                        spawned: Vec::new(),
                        backup: None,
                        notified: false,
                    });
                }
                ReflectionPolicy::Supersede => (revision + 1, Some(id)),
            },
            None => (1, None),
        };

        // (a) perception
        let policy = self.collaborators.policy;
        let digest = self.collaborators.perception.gather(&policy).await;
        let down: Vec<String> = digest
            .unavailable()
            .map(|(source, reason)| format!("{source}: {reason}"))
            .collect();
        for message in &down {
            self.record_failure("night.perception", message)?;
        }

        // (b) helper reports, (c) recent memory
        let since = now - Duration::hours(24);
        let reports = helper_reports(self.ctx.helpers.list(), self.ctx.tasks.list(), since);
        let recent = self.ctx.memory.recent(self.config.memory.recent_window);

        // (d) reflection
        let reflection = synthesize(ReflectionInputs {
            night,
            now,
            revision,
            supersedes,
            perception: digest,
            helper_reports: reports,
            recent: &recent,
            tasks: self.ctx.tasks.list(),
            since,
            budget: self.config.pulse.max_tasks_per_pulse,
        });
        let perception_healthy = reflection.perception.healthy();
        let perception_total = reflection.perception.total();
        let entry = MemoryEntry::new(
            MemoryCategory::Reflection,
            Payload::Reflection(Box::new(reflection.clone())),
            now,
        )
        .with_tags(["reflection".to_string(), format!("night:{night}")]);
        let reflection_id = self.ctx.memory.append(entry)?;
        info!(%night, revision, %reflection_id, "reflection recorded");

        // (e) spawn policy
        let spawned = self.spawn_helpers(now)?;

        // (f) backup and notify
        let backup = self.backup(now).await?;
        let markdown = reflection.to_markdown(&self.config.general.agent_name);
        let notified = self.notify(&markdown, night, &spawned, now).await?;

        Ok(NightReport {
            night,
            reflection_id,
            revision,
            skipped: false,
            perception_healthy,
            perception_total,
            spawned,
            backup,
            notified,
        })
    }

    fn spawn_helpers(&mut self, now: DateTime<Utc>) -> Result<Vec<HelperAgent>, PulseError> {
        let gaps = specialization_gaps(
            self.ctx.tasks.list(),
            self.ctx.helpers.list(),
            self.config.helpers.spawn_threshold,
        );
        let plan = plan_spawns(gaps, self.config.helpers.max_spawns_per_night);

        let mut spawned = Vec::with_capacity(plan.len());
        for gap in plan {
            let mission = format!(
                "Handle {} tasks delegated by {}",
                gap.skill, self.config.general.agent_name
            );
            let helper = self.ctx.spawn_helper(&gap.skill, &mission, now)?;
            info!(skill = %gap.skill, completed = gap.completed, helper = %helper.name, "specialist helper spawned");
            spawned.push(helper);
        }
        Ok(spawned)
    }

    async fn backup(&mut self, now: DateTime<Utc>) -> Result<Option<PathBuf>, PulseError> {
        let config = match serde_json::to_value(&self.config) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "config left out of the snapshot");
                self.record_failure("night.backup", &format!("config not encoded: {e}"))?;
                serde_json::Value::Null
            }
        };
        let bundle = BackupBundle {
            agent_id: self.ctx.agent_id().to_string(),
            created_at: now,
            config,
            memory: self.ctx.memory.entries().to_vec(),
            tasks: self.ctx.tasks.list().to_vec(),
            helpers: self.ctx.helpers.list().to_vec(),
        };
        let policy = self.collaborators.policy;
        let backup: &dyn Backup = self.collaborators.backup.as_ref();
        let bundle = &bundle;
        let result = policy.run("backup", || backup.snapshot(bundle)).await;
        match result {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                self.record_failure("night.backup", &e.to_string())?;
                Ok(None)
            }
        }
    }

    async fn notify(
        &mut self,
        markdown: &str,
        night: NaiveDate,
        spawned: &[HelperAgent],
        now: DateTime<Utc>,
    ) -> Result<bool, PulseError> {
        let mut body = markdown.to_string();
        if !spawned.is_empty() {
            body.push_str("\n## New helpers\n\n");
            for helper in spawned {
                body.push_str(&format!("- {}: {}\n", helper.name, helper.mission));
            }
        }
        let report = Report {
            subject: format!("{} nightly reflection {night}", self.config.general.agent_name),
            body,
            recipient: self.config.notifier.recipient.clone(),
            phase: PulsePhase::Night,
            created_at: now,
        };
        let policy = self.collaborators.policy;
        let notifier: &dyn Notifier = self.collaborators.notifier.as_ref();
        let report = &report;
        let result = policy.run("notifier", || notifier.send(report)).await;
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                self.record_failure("night.notify", &e.to_string())?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_core::clock::ManualClock;
    use ag_core::types::TaskStatus;
    use ag_harness::backup::SnapshotBackup;
    use ag_harness::notifier::OutboxNotifier;
    use ag_harness::skill::JournalSkill;
    use chrono::TimeZone;

    fn engine(dir: &std::path::Path) -> PulseEngine {
        let mut config = Config::default();
        config.general.state_dir = dir.to_string_lossy().into_owned();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        ));
        let collaborators = Collaborators {
            skill: Arc::new(JournalSkill),
            perception: PerceptionManager::default(),
            notifier: Arc::new(OutboxNotifier::new(dir.join("outbox"))),
            backup: Arc::new(SnapshotBackup::new(dir.join("backups"), 1)),
            policy: RetryPolicy::new(1, std::time::Duration::from_secs(1), std::time::Duration::ZERO),
        };
        PulseEngine::open(config, clock, collaborators).unwrap()
    }

    #[test]
    fn rejected_transitions_are_recorded_and_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());
        let err = TaskError::InvalidTransition {
            task_id: 7,
            from: TaskStatus::Completed,
            to: TaskStatus::InProgress,
        };

        engine.absorb_task_error("day.start", err).unwrap();
        let recorded = engine
            .context()
            .memory
            .query(&MemoryFilter::new().tag("error").tag("day.start"));
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].summary().contains("invalid transition for task 7"));
    }

    #[test]
    fn storage_errors_are_not_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path());
        let err = TaskError::Store(StoreError::StorageUnavailable {
            path: dir.path().join("tasks.json"),
            source: std::io::Error::other("read-only file system"),
        });

        let result = engine.absorb_task_error("day.complete", err);
        assert!(matches!(result, Err(PulseError::Storage(_))));
        assert!(engine
            .context()
            .memory
            .query(&MemoryFilter::new().tag("day.complete"))
            .is_empty());
    }
}
