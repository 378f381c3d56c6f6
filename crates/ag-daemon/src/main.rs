//! garden-daemon: runs the agent's day/night pulses until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use ag_core::config::Config;
use ag_daemon::daemon::Daemon;
use ag_telemetry::logging::{self, LogFormat};
use clap::Parser;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "garden-daemon", version, about = "Agent garden pulse daemon")]
struct Args {
    /// Config file (default: ~/.agent-garden/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override pulse.poll_interval_secs.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging("garden-daemon", "info");
            error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    let format = if config.general.json_logs() {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    logging::init("garden-daemon", &config.general.log_level, format);

    let interval = args
        .interval_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let daemon = match Daemon::new(config, interval) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %format!("{e:#}"), "daemon startup failed");
            return ExitCode::from(1);
        }
    };
    let shutdown = daemon.shutdown_handle();

    // Wire ctrl-c to trigger graceful shutdown.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, finishing current pulse");
        shutdown.trigger();
    });

    info!("agent garden daemon starting");
    daemon.run().await;
    ExitCode::SUCCESS
}
