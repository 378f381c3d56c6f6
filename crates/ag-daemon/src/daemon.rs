use std::sync::Arc;
use std::time::Duration;

use ag_core::clock::{Clock, SystemClock};
use ag_core::config::Config;
use ag_harness::backup::SnapshotBackup;
use ag_harness::notifier::OutboxNotifier;
use ag_harness::perception::PerceptionManager;
use ag_harness::retry::RetryPolicy;
use ag_harness::shutdown::ShutdownSignal;
use ag_harness::skill::SkillRegistry;
use anyhow::{Context, Result};
use tracing::info;

use crate::engine::{Collaborators, PulseEngine};
use crate::scheduler::SchedulerLoop;

/// The production collaborators described by `config`.
pub fn collaborators_from_config(config: &Config, clock: Arc<dyn Clock>) -> Collaborators {
    Collaborators {
        skill: Arc::new(SkillRegistry::from_config(config)),
        perception: PerceptionManager::from_config(&config.perception, clock),
        notifier: Arc::new(OutboxNotifier::new(config.outbox_dir())),
        backup: Arc::new(SnapshotBackup::new(config.backup_dir(), config.backup.keep)),
        policy: RetryPolicy::from_config(&config.collaborators),
    }
}

/// Validate `config`, open the agent's state and wire its collaborators.
pub fn open_engine(config: Config, clock: Arc<dyn Clock>) -> Result<PulseEngine> {
    config.validate().context("invalid configuration")?;
    let collaborators = collaborators_from_config(&config, Arc::clone(&clock));
    let state_dir = config.state_dir();
    PulseEngine::open(config, clock, collaborators)
        .with_context(|| format!("failed to open agent state under {}", state_dir.display()))
}

/// The long-running agent: a [`SchedulerLoop`] plus its shutdown handle.
pub struct Daemon {
    scheduler: SchedulerLoop,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Build a daemon on the system clock. Ticks every `interval`, or
    /// `pulse.poll_interval_secs` when none is given.
    pub fn new(config: Config, interval: Option<Duration>) -> Result<Self> {
        let interval =
            interval.unwrap_or_else(|| Duration::from_secs(config.pulse.poll_interval_secs));
        let engine = open_engine(config, Arc::new(SystemClock))?;
        Ok(Self::with_engine(engine, interval))
    }

    pub fn with_engine(engine: PulseEngine, interval: Duration) -> Self {
        let shutdown = ShutdownSignal::new();
        Self {
            scheduler: SchedulerLoop::new(engine, interval, shutdown.clone()),
            shutdown,
        }
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run until the shutdown signal fires. Returns the number of pulses run.
    pub async fn run(self) -> usize {
        info!(
            agent_id = self.scheduler.engine().context().agent_id(),
            "garden daemon running"
        );
        let pulses = self.scheduler.run().await;
        info!(pulses, "garden daemon stopped");
        pulses
    }
}
