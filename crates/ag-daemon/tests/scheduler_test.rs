use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ag_core::clock::{Clock, ManualClock};
use ag_core::config::Config;
use ag_core::memory::MemoryFilter;
use ag_core::types::{NewTask, Payload, PulseEventKind, PulsePhase, Task, TaskResult, TaskStatus};
use ag_daemon::daemon::{collaborators_from_config, Daemon};
use ag_daemon::engine::{Collaborators, PulseEngine, PulseOutcome};
use ag_daemon::scheduler::{SchedulerLoop, TickOutcome};
use ag_harness::backup::{Backup, BackupBundle, BackupError};
use ag_harness::notifier::{Notifier, NotifyError, Report};
use ag_harness::perception::PerceptionManager;
use ag_harness::retry::RetryPolicy;
use ag_harness::shutdown::ShutdownSignal;
use ag_harness::skill::{Skill, SkillFailure};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

/// Panics the first time it sees a task described as "explode".
#[derive(Default)]
struct VolatileSkill {
    exploded: AtomicBool,
}

#[async_trait]
impl Skill for VolatileSkill {
    fn name(&self) -> &str {
        "volatile"
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, SkillFailure> {
        if task.description == "explode" && !self.exploded.swap(true, Ordering::SeqCst) {
            panic!("skill blew up");
        }
        Ok(TaskResult::new("ok"))
    }
}

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _report: &Report) -> Result<(), NotifyError> {
        Ok(())
    }
}

struct NullBackup;

#[async_trait]
impl Backup for NullBackup {
    async fn snapshot(&self, _bundle: &BackupBundle) -> Result<PathBuf, BackupError> {
        Ok(PathBuf::from("null"))
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.general.state_dir = dir.path().to_string_lossy().into_owned();
    config
}

fn scheduler(dir: &TempDir, clock: Arc<ManualClock>, interval: Duration) -> (SchedulerLoop, ShutdownSignal) {
    let collaborators = Collaborators {
        skill: Arc::new(VolatileSkill::default()),
        perception: PerceptionManager::default(),
        notifier: Arc::new(NullNotifier),
        backup: Arc::new(NullBackup),
        policy: RetryPolicy::new(1, Duration::from_secs(1), Duration::ZERO),
    };
    let engine = PulseEngine::open(config_in(dir), clock as Arc<dyn Clock>, collaborators).unwrap();
    let shutdown = ShutdownSignal::new();
    (SchedulerLoop::new(engine, interval, shutdown.clone()), shutdown)
}

fn enqueue(scheduler: &mut SchedulerLoop, description: &str) -> u64 {
    let now = scheduler.engine().now();
    scheduler
        .engine_mut()
        .context_mut()
        .tasks
        .enqueue(NewTask::new(description), now)
        .unwrap()
}

#[tokio::test]
async fn ticks_run_on_phase_change_or_pending_work() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(at(1, 9)));
    let (mut scheduler, _shutdown) = scheduler(&dir, clock.clone(), Duration::from_secs(60));

    assert!(matches!(scheduler.tick().await, TickOutcome::Ran(PulseOutcome::Day(_))));
    assert_eq!(
        scheduler.tick().await,
        TickOutcome::Idle {
            phase: PulsePhase::Day
        }
    );

    enqueue(&mut scheduler, "water the plants");
    assert!(matches!(scheduler.tick().await, TickOutcome::Ran(PulseOutcome::Day(_))));

    clock.set(at(1, 21));
    assert!(matches!(scheduler.tick().await, TickOutcome::Ran(PulseOutcome::Night(_))));
    assert_eq!(
        scheduler.tick().await,
        TickOutcome::Idle {
            phase: PulsePhase::Night
        }
    );
    assert_eq!(scheduler.last_phase(), Some(PulsePhase::Night));
}

#[tokio::test]
async fn a_panicking_pulse_is_contained_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(at(1, 9)));
    let (mut scheduler, _shutdown) = scheduler(&dir, clock, Duration::from_secs(60));
    let id = enqueue(&mut scheduler, "explode");

    match scheduler.tick().await {
        TickOutcome::Failed(failure) => {
            assert!(failure.panicked);
            assert!(failure.message.contains("skill blew up"));
        }
        other => panic!("expected a failed tick, got {other:?}"),
    }
    assert_eq!(scheduler.last_phase(), None);
    let memory = &scheduler.engine().context().memory;
    assert_eq!(memory.query(&MemoryFilter::new().tag("scheduler")).len(), 1);

    // The stranded task is requeued and finished on the next tick.
    assert!(matches!(scheduler.tick().await, TickOutcome::Ran(PulseOutcome::Day(_))));
    assert_eq!(
        scheduler.engine().context().tasks.get(id).unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn storage_outage_fails_the_pulse_and_the_next_tick_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(at(1, 9)));
    let (mut scheduler, _shutdown) = scheduler(&dir, clock, Duration::from_secs(60));
    let id = enqueue(&mut scheduler, "water the plants");

    // A directory where tasks.json should be makes every queue write fail.
    let tasks_file = dir.path().join("agents/garden/tasks.json");
    let saved = std::fs::read(&tasks_file).unwrap();
    std::fs::remove_file(&tasks_file).unwrap();
    std::fs::create_dir(&tasks_file).unwrap();

    match scheduler.tick().await {
        TickOutcome::Failed(failure) => {
            assert!(!failure.panicked);
            assert!(failure.message.contains("storage unavailable"));
        }
        other => panic!("expected a failed tick, got {other:?}"),
    }
    assert_eq!(scheduler.last_phase(), None);
    {
        let memory = &scheduler.engine().context().memory;
        let failed_events = memory
            .query(&MemoryFilter::new().tag("pulse").tag("day"))
            .into_iter()
            .filter(|e| {
                matches!(
                    e.content,
                    Payload::PulseEvent {
                        event: PulseEventKind::Failed,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(failed_events, 1);
        assert_eq!(memory.query(&MemoryFilter::new().tag("scheduler")).len(), 1);
    }

    std::fs::remove_dir(&tasks_file).unwrap();
    std::fs::write(&tasks_file, saved).unwrap();

    assert!(matches!(scheduler.tick().await, TickOutcome::Ran(PulseOutcome::Day(_))));
    let ctx = scheduler.engine().context();
    assert_eq!(ctx.tasks.get(id).unwrap().status, TaskStatus::Completed);
    // The start transition recorded before the outage is reused, not repeated.
    let started = ctx
        .memory
        .query(&MemoryFilter::new().tag(format!("task:{id}")).tag("in_progress"));
    assert_eq!(started.len(), 1);
}

#[tokio::test]
async fn single_run_honours_a_forced_phase() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(at(1, 9)));
    let (mut scheduler, _shutdown) = scheduler(&dir, clock, Duration::from_secs(60));

    let outcome = scheduler.run_single(Some(PulsePhase::Night)).await.unwrap();
    assert_eq!(outcome.phase(), PulsePhase::Night);
    let outcome = scheduler.run_single(None).await.unwrap();
    assert_eq!(outcome.phase(), PulsePhase::Day);
}

#[tokio::test]
async fn loop_exits_when_shutdown_was_already_triggered() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(at(1, 9)));
    let (scheduler, shutdown) = scheduler(&dir, clock, Duration::from_millis(10));
    shutdown.trigger();

    let pulses = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("loop should stop");
    assert_eq!(pulses, 0);
}

#[tokio::test]
async fn loop_runs_pulses_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(at(1, 9)));
    let (scheduler, shutdown) = scheduler(&dir, clock, Duration::from_millis(10));

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();
    });

    let pulses = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("loop should stop");
    // The first tick is a phase change; later ticks find nothing to do.
    assert_eq!(pulses, 1);
}

#[tokio::test]
async fn daemon_wires_production_collaborators() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let collaborators = collaborators_from_config(&config, Arc::new(ManualClock::new(at(1, 9))));
    assert!(collaborators.perception.is_empty());

    let daemon = Daemon::new(config, Some(Duration::from_millis(10))).unwrap();
    daemon.shutdown_handle().trigger();
    let pulses = tokio::time::timeout(Duration::from_secs(5), daemon.run())
        .await
        .expect("daemon should stop");
    assert_eq!(pulses, 0);
    assert!(dir.path().join("agents/garden").exists());
}

#[test]
fn daemon_rejects_invalid_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.pulse.max_tasks_per_pulse = 0;
    assert!(Daemon::new(config, None).is_err());
}
