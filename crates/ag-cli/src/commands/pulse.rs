use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ag_core::clock::SystemClock;
use ag_core::config::Config;
use ag_core::types::PulsePhase;
use ag_daemon::daemon::open_engine;
use ag_daemon::engine::PulseOutcome;
use ag_daemon::scheduler::SchedulerLoop;
use ag_harness::shutdown::ShutdownSignal;

/// Run one pulse. Exit code 2 when the pulse itself failed.
pub async fn run(config: Config, phase: Option<PulsePhase>) -> ExitCode {
    let interval = Duration::from_secs(config.pulse.poll_interval_secs);
    let engine = match open_engine(config, Arc::new(SystemClock)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(1);
        }
    };
    let mut scheduler = SchedulerLoop::new(engine, interval, ShutdownSignal::new());
    match scheduler.run_single(phase).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("error: {failure}");
            ExitCode::from(2)
        }
    }
}

fn print_outcome(outcome: &PulseOutcome) {
    println!("{outcome}");
    match outcome {
        PulseOutcome::Day(report) => {
            if report.planned {
                println!("  daily plan recorded");
            }
            if !report.executed.is_empty() {
                let ids: Vec<String> = report.executed.iter().map(|id| format!("#{id}")).collect();
                println!("  executed: {}", ids.join(", "));
            }
            if report.budget_exhausted {
                println!("  budget exhausted; remaining tasks wait for the next pulse");
            }
        }
        PulseOutcome::Night(report) => {
            println!("  reflection: {}", report.reflection_id);
            for helper in &report.spawned {
                println!("  new helper: {} ({})", helper.name, helper.specialization);
            }
            if let Some(path) = &report.backup {
                println!("  backup: {}", path.display());
            }
        }
    }
}
