mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use ag_core::config::Config;
use ag_core::types::{MemoryCategory, PulsePhase};
use ag_telemetry::logging::{self, LogFormat};
use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// agent garden CLI -- run pulses and inspect an agent's tasks, memory and helpers.
#[derive(Parser)]
#[command(name = "garden", version, about)]
struct Cli {
    /// Config file (default: ~/.agent-garden/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show phase, queue and helper summary (default when no subcommand is given).
    Status,

    /// Run a single pulse now.
    Pulse {
        /// Force the phase instead of deriving it from the clock.
        #[arg(long)]
        phase: Option<PulsePhase>,
    },

    /// Run exactly one phase routine according to the clock, then exit.
    Once,

    /// Manage the task queue.
    #[command(subcommand)]
    Task(TaskCommand),

    /// Read the agent's memory.
    #[command(subcommand)]
    Memory(MemoryCommand),

    /// Inspect or create helper agents.
    #[command(subcommand)]
    Helpers(HelpersCommand),

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Queue a new task.
    Add {
        description: String,
        /// high, medium, low or an integer (higher runs first).
        #[arg(short, long)]
        priority: Option<String>,
        /// Skill that should execute the task.
        #[arg(short, long)]
        skill: Option<String>,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// List pending tasks in execution order.
    List {
        /// Include in-progress and finished tasks.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Most recent entries, newest first.
    Recent {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        #[arg(long)]
        json: bool,
    },
    /// Filter entries by category, tag and date range.
    Query {
        #[arg(short, long)]
        category: Option<MemoryCategory>,
        /// May be repeated; every tag must match.
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Inclusive lower bound: RFC 3339 instant or YYYY-MM-DD.
        #[arg(long)]
        since: Option<String>,
        /// Exclusive upper bound: RFC 3339 instant or YYYY-MM-DD.
        #[arg(long)]
        until: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HelpersCommand {
    /// List helpers with their completed task counts.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Spawn a helper by hand.
    Spawn {
        specialization: String,
        #[arg(short, long)]
        mission: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the default config file location.
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load configuration: {e}");
            return ExitCode::from(1);
        }
    };

    // Pulses log at the configured level; inspection commands stay quiet.
    let level = match cli.command {
        Some(Commands::Pulse { .. }) | Some(Commands::Once) => config.general.log_level.as_str(),
        _ => "warn",
    };
    let format = if config.general.json_logs() {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    logging::init("garden", level, format);

    let result = match cli.command {
        None | Some(Commands::Status) => commands::status::run(&config),
        Some(Commands::Pulse { phase }) => return commands::pulse::run(config, phase).await,
        Some(Commands::Once) => return commands::pulse::run(config, None).await,
        Some(Commands::Task(TaskCommand::Add {
            description,
            priority,
            skill,
            tags,
        })) => commands::task::add(&config, &description, priority.as_deref(), skill, tags),
        Some(Commands::Task(TaskCommand::List { all, json })) => {
            commands::task::list(&config, all, json)
        }
        Some(Commands::Memory(MemoryCommand::Recent { count, json })) => {
            commands::memory::recent(&config, count, json)
        }
        Some(Commands::Memory(MemoryCommand::Query {
            category,
            tags,
            since,
            until,
            limit,
            json,
        })) => commands::memory::query(
            &config,
            commands::memory::QueryArgs {
                category,
                tags,
                since,
                until,
                limit,
            },
            json,
        ),
        Some(Commands::Helpers(HelpersCommand::List { json })) => {
            commands::helpers::list(&config, json)
        }
        Some(Commands::Helpers(HelpersCommand::Spawn {
            specialization,
            mission,
        })) => commands::helpers::spawn(&config, &specialization, mission.as_deref()),
        Some(Commands::Config(ConfigCommand::Show)) => commands::config::show(&config),
        Some(Commands::Config(ConfigCommand::Path)) => commands::config::path(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
