pub mod config;
pub mod helpers;
pub mod memory;
pub mod pulse;
pub mod status;
pub mod task;

use ag_core::config::Config;
use ag_core::context::AgentContext;
use anyhow::Context;
use serde::Serialize;

/// Open the configured agent's state directory.
pub fn open_context(config: &Config) -> anyhow::Result<AgentContext> {
    let state_dir = config.state_dir();
    tracing::debug!(agent = %config.general.agent_id, dir = %state_dir.display(), "opening agent state");
    AgentContext::open(&state_dir, &config.general.agent_id).with_context(|| {
        format!(
            "failed to open agent '{}' under {}",
            config.general.agent_id,
            state_dir.display()
        )
    })
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shorten `s` to `max` characters for table output.
pub fn clip(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
