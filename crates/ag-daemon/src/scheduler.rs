use std::panic::AssertUnwindSafe;
use std::time::Duration;

use ag_core::types::PulsePhase;
use ag_harness::shutdown::ShutdownSignal;
use futures::FutureExt;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::{PulseEngine, PulseOutcome};

/// A pulse that did not complete: an error it returned or a panic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} pulse failed: {message}")]
pub struct PulseFailure {
    pub phase: PulsePhase,
    pub message: String,
    pub panicked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Ran(PulseOutcome),
    /// Same phase as last tick and nothing to do.
    Idle { phase: PulsePhase },
    Failed(PulseFailure),
}

/// Drives the [`PulseEngine`] from the clock.
///
/// A tick runs the phase routine when the phase changed since the last
/// successful pulse, or during the day while tasks are pending. Nothing that
/// goes wrong inside a pulse stops the loop.
pub struct SchedulerLoop {
    engine: PulseEngine,
    interval: Duration,
    shutdown: ShutdownSignal,
    last_phase: Option<PulsePhase>,
}

impl SchedulerLoop {
    pub fn new(engine: PulseEngine, interval: Duration, shutdown: ShutdownSignal) -> Self {
        Self {
            engine,
            interval,
            shutdown,
            last_phase: None,
        }
    }

    pub fn engine(&self) -> &PulseEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PulseEngine {
        &mut self.engine
    }

    pub fn last_phase(&self) -> Option<PulsePhase> {
        self.last_phase
    }

    fn should_run(&self, phase: PulsePhase) -> bool {
        self.last_phase != Some(phase)
            || (phase == PulsePhase::Day && self.engine.context().tasks.next_pending().is_some())
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let phase = self.engine.phase_now();
        if !self.should_run(phase) {
            debug!(%phase, "nothing to do this tick");
            return TickOutcome::Idle { phase };
        }
        match self.run_guarded(phase, false).await {
            Ok(outcome) => {
                self.last_phase = Some(phase);
                TickOutcome::Ran(outcome)
            }
            Err(failure) => TickOutcome::Failed(failure),
        }
    }

    /// Exactly one phase routine: the forced phase, or the clock's.
    pub async fn run_single(&mut self, force: Option<PulsePhase>) -> Result<PulseOutcome, PulseFailure> {
        let (phase, forced) = match force {
            Some(phase) => (phase, true),
            None => (self.engine.phase_now(), false),
        };
        let outcome = self.run_guarded(phase, forced).await?;
        self.last_phase = Some(phase);
        Ok(outcome)
    }

    async fn run_guarded(&mut self, phase: PulsePhase, forced: bool) -> Result<PulseOutcome, PulseFailure> {
        let result = AssertUnwindSafe(self.engine.run_phase(phase, forced))
            .catch_unwind()
            .await;
        let failure = match result {
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(e)) => PulseFailure {
                phase,
                message: e.to_string(),
                panicked: false,
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                if let Err(e) = self.engine.reload() {
                    warn!(error = %e, "could not reload agent state after panic");
                }
                PulseFailure {
                    phase,
                    message: format!("panicked: {message}"),
                    panicked: true,
                }
            }
        };

        error!(%phase, panicked = failure.panicked, error = %failure.message, "pulse failed");
        if let Err(e) = self.engine.record_failure("scheduler", &failure.to_string()) {
            warn!(error = %e, "could not record pulse failure in memory");
        }
        Err(failure)
    }

    /// Tick until shutdown. Returns the number of pulses that ran.
    pub async fn run(mut self) -> usize {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();
        let mut pulses = 0;

        info!(interval_secs = self.interval.as_secs(), "scheduler loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!("shutdown signal received, stopping scheduler loop");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        TickOutcome::Ran(outcome) => {
                            pulses += 1;
                            debug!(phase = %outcome.phase(), "tick ran a pulse");
                        }
                        TickOutcome::Idle { .. } => {}
                        TickOutcome::Failed(failure) => {
                            warn!(phase = %failure.phase, "pulse failed, retrying next interval");
                        }
                    }
                }
            }
        }
        pulses
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
